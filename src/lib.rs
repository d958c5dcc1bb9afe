//! Seed reference module.
//!
//! Publications form threads rooted at an original post; a relayer credits
//! sun/rain/soil rewards to profiles from off-chain engagement, and profile
//! controllers claim them back as currency.
//!
//! * [`tree`]: publication threads and top-engagement ranking.
//! * [`ledger`]: the three-category reward ledger with staged credits and
//!   atomic claims.
//! * [`gateway`]: the fixed payment pulled when commenting on a gated
//!   publication.
//! * [`access`]: owner, relayer and profile-controller checks.
//! * [`module`]: [`SeedModule`], wiring all of the above together.
//!
//! The profile registry and the currency are external capabilities, reached
//! through [`access::ProfileRegistry`] and [`currency::Currency`].

pub mod access;
pub mod address;
pub mod config;
pub mod currency;
pub mod gateway;
pub mod ledger;
pub mod module;
pub mod scenario;
pub mod tree;

pub use address::Address;
pub use config::SeedConfig;
pub use ledger::{LedgerError, LedgerEvent, RewardBalance, RewardLedger, SeedReward};
pub use module::{CommentRequest, ErrorClass, SeedError, SeedModule};
pub use tree::{PublicationNode, PublicationTree, ThreadRegistry};
