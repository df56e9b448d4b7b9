#[macro_use]
extern crate error_chain;

pub mod apis;
pub mod client;
pub mod config;
pub mod constant;
pub mod crd;
pub mod lifecycle;
pub mod proto;
pub mod reader;

#[cfg(test)]
mod testing;

pub mod errors {
    // Create the Error, ErrorKind, ResultExt, and Result types
    error_chain! {
        foreign_links {
            Io(std::io::Error);
            HttpRequest(reqwest::Error);
            Kube(kube::Error);
            Json(serde_json::Error);
            Yaml(serde_yaml::Error);
            Hyper(hyper::Error);
            Http(hyper::http::Error);
        }

        errors {
            ActionNotDefined(ctx: String) {
                description("action is not defined")
                display("{}: action is not defined", ctx)
            }
            ActionNotImplemented(ctx: String) {
                description("action is not implemented")
                display("{}: action is not implemented", ctx)
            }
            PreconditionFailed(ctx: String) {
                description("precondition failed")
                display("precondition failed: {}", ctx)
            }
            ActionInProgress(ctx: String) {
                description("action is in progress")
                display("{}: action is in progress", ctx)
            }
            ActionBusy(ctx: String) {
                description("action is busy")
                display("{}: action is busy", ctx)
            }
            ActionTimedOut(ctx: String) {
                description("action timed-out")
                display("{}: action timed-out", ctx)
            }
            ActionFailed(ctx: String) {
                description("action failed")
                display("{}: action failed", ctx)
            }
            ActionInternalError(ctx: String) {
                description("action internal error")
                display("{}: action internal error", ctx)
            }
            AgentError(code: String, ctx: String) {
                description("unknown agent error")
                display("{}: {}", ctx, code)
            }
        }
    }

    impl Error {
        pub fn is_not_defined(&self) -> bool {
            matches!(self.kind(), ErrorKind::ActionNotDefined(_))
        }

        pub fn is_precondition_failed(&self) -> bool {
            matches!(self.kind(), ErrorKind::PreconditionFailed(_))
        }
    }
}
