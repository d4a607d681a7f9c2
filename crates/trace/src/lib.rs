pub mod expansion;
pub mod tracer;

pub use expansion::{ExpansionGuard, ExpansionObserver, ExpansionPattern};
pub use tracer::{PerfTracer, SlowSpanObserver, SpanSnapshot};
