pub mod fetcher;
pub mod lookup;
pub mod parser;
pub mod resolver;
pub mod task_queue;

pub use fetcher::{Fetcher, HttpFetcher, RetryPolicy};
pub use lookup::{LookupError, LookupOrchestrator, LookupSource};
pub use parser::{ExtractionStrategy, FlightStatsExtractor};
pub use resolver::{FlightResolver, ResolutionOutcome, ResolverSettings};
pub use task_queue::{DisabledQueue, ResolverWorkerPool, TaskOutcome, TaskQueue};
