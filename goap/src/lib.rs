//! Budget-aware goal-oriented action planning.
//!
//! Given a current world state, a goal state and a catalog of costed actions,
//! the planner finds the cheapest action sequence that reaches the goal. A
//! daily spend ledger acts as a circuit breaker, and the executor runs plans
//! step by step while recording real spend. The architecture enforces a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (world state, regression search,
//!   catalog validation, budget arithmetic). No I/O, fully testable in isolation.
//! - **[`io`]**: Side-effecting operations (clock, config files, child
//!   processes, ledger snapshots).
//!
//! [`ledger`] and [`execute`] hold the shared runtime pieces; [`driver`]
//! coordinates them for the CLI commands.

pub mod core;
pub mod driver;
pub mod error;
pub mod execute;
pub mod exit_codes;
pub mod io;
pub mod ledger;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
