pub mod adapters;
pub mod bronze;
pub mod circuit_breaker;
pub mod dispatcher;
pub mod fetch;
pub mod gold;
pub mod operational;
pub mod pipeline;
pub mod silver;

pub use adapters::{AdapterRegistry, FetchPolicy, SourceAdapter};
pub use bronze::{validate_payload, BronzeWriteError, BronzeWriter};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use dispatcher::{DispatcherStats, ScrapeDispatcher};
pub use fetch::{FetchError, FetchRequest, FetchResponse, FetchService};
pub use gold::{keys_compatible, parse_key, CamelotKey, GoldAggregator};
pub use operational::{MaterializeSummary, OperationalMaterializer};
pub use pipeline::{Pipeline, PipelineError, PipelineJob, PipelineOutcome};
pub use silver::{SilverCanonicalizer, CanonicalizationOutcome};
