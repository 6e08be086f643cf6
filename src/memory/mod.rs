/// Stratified memory storage.
///
/// Every owner (agent or channel) gets five tiers, each with its own capacity
/// and maintenance cadence:
///
/// ```text
/// Working (50, every cycle)
///     ↓ survives the retention gate
/// ShortTerm (200, every 3 cycles)
///     ↓
/// Episodic (500, every 10 cycles)   ── abstraction ──→  Semantic (1000)
///     ↓
/// LongTerm (2000, every 50 cycles, archival only)
/// ```
///
/// [`StratumManager`] is the only writer. Tier-to-tier movement is driven by
/// the orchestrator; the manager guarantees that a move is atomic and that an
/// entry lives in exactly one tier.
pub mod manager;
pub mod store;

pub use manager::{
    AccessSummary, MemoryQuery, MemoryUpdate, QueryResult, StratumManager, StratumStatistics,
};
pub use store::{ScopeMemory, StratumStore};
