//! Bet placement: the ticket handed to a placer, the placer capability, and
//! the built-in simulated placer.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::error::PlacementError;
use crate::random::Dice;
use crate::state::{Bet, PrepType};

/// Simulated prices are drawn from `[PRICE_BASE, PRICE_BASE + PRICE_SPAN]`.
const PRICE_BASE: f64 = 1.2;
const PRICE_SPAN: f64 = 2.2;
/// Simulated stakes are drawn from `[STAKE_BASE, STAKE_BASE + STAKE_SPAN]`.
const STAKE_BASE: f64 = 1.0;
const STAKE_SPAN: f64 = 9.0;

const CURRENCY: &str = "USD";

/// Everything a placer needs to know about the bet being placed.
///
/// Captured atomically with the busy flag, so it reflects the state at the
/// moment the placement was accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetTicket {
    /// Which caller triggered the placement (e.g. `"popup"`, `"shortcut"`).
    pub origin: String,
    pub mode: PrepType,
    pub prepared: bool,
}

impl BetTicket {
    /// Descriptive event name for the ticket's mode.
    pub fn event(&self) -> &'static str {
        match self.mode {
            PrepType::Danger => "High volatility market",
            PrepType::Instant => "Primary market",
        }
    }

    /// Descriptive market name for the ticket's mode.
    pub fn market(&self) -> &'static str {
        match self.mode {
            PrepType::Danger => "Lay — Rapid cashout",
            PrepType::Instant => "Back — Value bet",
        }
    }
}

/// What a placer reports back for an accepted ticket.
#[derive(Debug, Clone, PartialEq)]
pub struct Quote {
    pub price: f64,
    pub stake: f64,
    pub status: String,
}

/// Boxed future returned by [`BetPlacer::place`].
pub type PlaceFuture<'a> = Pin<Box<dyn Future<Output = Result<Quote, PlacementError>> + Send + 'a>>;

/// The capability that actually places a bet.
///
/// The engine guarantees at most one call is in flight at a time. Real
/// wagering integrations implement this trait; the crate only ships
/// [`SimulatedPlacer`].
pub trait BetPlacer: Send + Sync + 'static {
    fn place<'a>(&'a self, ticket: &'a BetTicket) -> PlaceFuture<'a>;
}

/// Placer that waits a fixed latency and quotes random amounts.
#[derive(Debug)]
pub struct SimulatedPlacer {
    latency: Duration,
    dice: Arc<Dice>,
}

impl SimulatedPlacer {
    pub fn new(latency: Duration, dice: Arc<Dice>) -> Self {
        Self { latency, dice }
    }
}

impl BetPlacer for SimulatedPlacer {
    fn place<'a>(&'a self, ticket: &'a BetTicket) -> PlaceFuture<'a> {
        Box::pin(async move {
            tokio::time::sleep(self.latency).await;
            let quote = Quote {
                price: self.dice.amount(PRICE_BASE, PRICE_SPAN),
                stake: self.dice.amount(STAKE_BASE, STAKE_SPAN),
                status: "Sent".to_owned(),
            };
            tracing::debug!(origin = %ticket.origin, price = quote.price, stake = quote.stake, "simulated placement");
            Ok(quote)
        })
    }
}

/// Issues bet ids derived from the creation time.
///
/// Ids are `BET-<millis>`; when two bets land in the same millisecond (or
/// the clock steps back) the later one is bumped past the previous id, so
/// ids stay unique and strictly increasing for the life of the process.
#[derive(Debug, Default)]
pub struct BetIds {
    last_millis: AtomicI64,
}

impl BetIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id for a bet created at `now`.
    pub fn next(&self, now: DateTime<Utc>) -> String {
        let now_ms = now.timestamp_millis();
        let mut prev = self.last_millis.load(Ordering::Relaxed);
        loop {
            let candidate = now_ms.max(prev + 1);
            match self.last_millis.compare_exchange_weak(
                prev,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return format!("BET-{candidate}"),
                Err(actual) => prev = actual,
            }
        }
    }

    /// Assemble the immutable bet record for a placed ticket.
    pub fn assemble(&self, ticket: BetTicket, quote: Quote) -> Bet {
        let created_at = Utc::now();
        Bet {
            id: self.next(created_at),
            created_at,
            event: ticket.event().to_owned(),
            market: ticket.market().to_owned(),
            price: quote.price,
            stake: quote.stake,
            currency: CURRENCY.to_owned(),
            prepared: ticket.prepared,
            mode: ticket.mode,
            status: quote.status,
            origin: ticket.origin,
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone as _;

    use super::*;

    fn ticket(mode: PrepType) -> BetTicket {
        BetTicket {
            origin: "popup".into(),
            mode,
            prepared: true,
        }
    }

    #[test]
    fn ids_are_strictly_increasing_within_one_millisecond() {
        let ids = BetIds::new();
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).unwrap();
        assert_eq!(ids.next(now), "BET-1700000000123");
        assert_eq!(ids.next(now), "BET-1700000000124");
        assert_eq!(ids.next(now), "BET-1700000000125");
    }

    #[test]
    fn ids_survive_clock_stepping_back() {
        let ids = BetIds::new();
        let later = Utc.timestamp_millis_opt(2_000).unwrap();
        let earlier = Utc.timestamp_millis_opt(1_000).unwrap();
        assert_eq!(ids.next(later), "BET-2000");
        assert_eq!(ids.next(earlier), "BET-2001");
    }

    #[test]
    fn assemble_copies_ticket_and_quote() {
        let ids = BetIds::new();
        let bet = ids.assemble(
            ticket(PrepType::Danger),
            Quote {
                price: 2.5,
                stake: 3.0,
                status: "Sent".into(),
            },
        );
        assert!(bet.id.starts_with("BET-"));
        assert_eq!(bet.event, "High volatility market");
        assert_eq!(bet.market, "Lay — Rapid cashout");
        assert_eq!(bet.mode, PrepType::Danger);
        assert!(bet.prepared);
        assert_eq!(bet.currency, "USD");
        assert_eq!(bet.origin, "popup");
        assert_eq!(bet.price, 2.5);
    }

    #[test]
    fn instant_ticket_uses_primary_market() {
        let t = ticket(PrepType::Instant);
        assert_eq!(t.event(), "Primary market");
        assert_eq!(t.market(), "Back — Value bet");
    }

    #[tokio::test(start_paused = true)]
    async fn simulated_placer_waits_latency_and_quotes_in_range() {
        let placer = SimulatedPlacer::new(Duration::from_millis(600), Arc::new(Dice::seeded(3)));
        let started = tokio::time::Instant::now();

        let quote = placer
            .place(&ticket(PrepType::Instant))
            .await
            .expect("simulated placement never fails");

        assert!(started.elapsed() >= Duration::from_millis(600));
        assert!((1.2..=3.4).contains(&quote.price));
        assert!((1.0..=10.0).contains(&quote.stake));
        assert_eq!(quote.status, "Sent");
    }
}
