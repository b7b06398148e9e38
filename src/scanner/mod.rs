pub mod error;
pub mod config;
pub mod discriminator;
pub mod syntax;
pub mod triple;
pub mod cache;
pub mod change;
pub mod verb_morphology;
pub mod analyzer;
pub mod registry;
pub mod implicit;
pub mod temporal;
pub mod relation;
pub mod events;
pub mod worker;
pub mod enrich;
pub mod orchestrator;
pub mod document;

pub use error::*;
pub use config::*;
pub use discriminator::*;
pub use syntax::*;
pub use triple::*;
pub use cache::*;
pub use change::*;
pub use verb_morphology::*;
pub use analyzer::*;
pub use registry::*;
pub use implicit::*;
pub use temporal::*;
pub use relation::*;
pub use events::*;
pub use worker::*;
pub use enrich::*;
pub use orchestrator::*;
pub use document::*;
