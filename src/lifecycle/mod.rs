mod shutdown;

pub use shutdown::{QuitReceiver, ShutdownSignal};
