mod middleware;
mod print;

pub use middleware::RequestContext;
pub use print::{PrintState, build_router};
