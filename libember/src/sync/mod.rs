pub mod mutex;

pub use mutex::{
    SimpleMutex,
    SimpleMutexGuard,
};
