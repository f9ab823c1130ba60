use stepwise_engine::Unwind;

/// Error raised while loading or running an execution script.
#[derive(thiserror::Error, Debug)]
pub enum ScriptError {
    /// A top-level run names a function the script never defined.
    #[error("function {0} is not defined")]
    UnknownFunction(String),

    /// A `yield` statement appears outside the top level of a generator body.
    #[error("function {0} yields outside the top level of a generator body")]
    MisplacedYield(String),

    /// The engine rejected a function definition.
    #[error("invalid definition of function {function}")]
    Definition {
        /// Name of the defined function.
        function: String,

        /// Engine error.
        #[source]
        source: stepwise_engine::Error,
    },

    /// A run was aborted by something other than a user exception.
    #[error("run of function {function} aborted")]
    Aborted {
        /// Name of the function run.
        function: String,

        /// Non-local exit that aborted the run.
        #[source]
        source: Unwind,
    },

    /// A spawned run panicked.
    #[error("thread running function {0} panicked")]
    ThreadPanicked(String),
}
