//! 同步原语 (Synchronization Primitives)
//!
//! 参考 Linux 内核的同步机制设计：
//! - `include/linux/semaphore.h` - 信号量
//!
//! 临界区很短的共享结构（运行队列、睡眠队列）直接使用 `spin::Mutex`，
//! 这里只有会让线程阻塞的计数信号量。

pub mod semaphore;

pub use semaphore::{SemDown, Semaphore};
