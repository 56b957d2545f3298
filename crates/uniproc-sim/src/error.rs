use uniproc_kernel::ThreadHandle;

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("deadlock: {blocked:?} blocked with no thread runnable")]
    Deadlock { blocked: Vec<ThreadHandle> },

    #[error("gave up after {switches} context switches")]
    StepLimit { switches: u64 },

    #[error("{name} ({thread}) panicked: {message}")]
    ThreadPanicked {
        thread: ThreadHandle,
        name: String,
        message: String,
    },

    #[error("machine has halted")]
    Halted,

    #[error("cannot start host thread: {0}")]
    HostThread(#[from] std::io::Error),
}
