pub mod capture;
pub mod collect;
pub mod credentials;
pub mod error;
pub mod events;
pub mod locator;
pub mod models;
pub mod output;
pub mod profile;
pub mod selector;
pub mod session;
pub mod traits;
pub mod util;

#[cfg(test)]
mod testutil;

pub use capture::{
    CaptureConfig, CapturePipeline, CaptureReport, CardOutcome, CardStatus, capture_cards,
};
pub use collect::{Collector, ConvergenceConfig, Harvest, StopReason};
pub use credentials::{CredentialSource, Credentials};
pub use error::AppError;
pub use events::{HarvestEvent, HarvestReporter, NullReporter, TracingReporter};
pub use locator::Locator;
pub use models::{AuthState, IdentifierSet, Probe, UrlPattern};
pub use profile::{ProfileConfig, harvest_followers, open_followers};
pub use selector::{SelectorStrategy, StrategySet};
pub use session::{LoginReport, Session, SessionConfig};
pub use traits::Driver;
