//! MIT License
//!
//! Copyright (c) 2026 Tachyon Developers
//!
//! 调度器测试：轮转公平性、空闲线程、残留项、切换时的地址空间加载

use alloc::vec::Vec;

use super::util::{boot, boot_init, host};
use crate::config::TIME_SLICE_TICKS;
use crate::process::{QueueLink, ThreadRef, ThreadState, WaitKey, PID_INIT};

#[test]
fn test_round_robin_is_fair() {
    let (mut k, _) = boot();
    let threads: Vec<ThreadRef> = ["a", "b", "c"]
        .iter()
        .map(|name| ThreadRef::new(k.spawn_kernel(name, 0x1000), 0))
        .collect();

    // 从 idle 出发第一个滴答立即切换，此后每个时间片切换一次
    let mut order = Vec::new();
    k.timer_tick();
    order.push(k.current().unwrap());
    for _ in 0..8 {
        for _ in 0..TIME_SLICE_TICKS {
            k.timer_tick();
        }
        order.push(k.current().unwrap());
    }

    for window in order.chunks(3) {
        let mut seen = window.to_vec();
        seen.sort();
        assert_eq!(seen, threads, "window {:?} is not a full rotation", window);
    }
    let running = threads
        .iter()
        .filter(|&&t| k.thread(t).unwrap().state == ThreadState::Running)
        .count();
    assert_eq!(running, 1);
}

#[test]
fn test_idle_runs_when_queue_empty() {
    let (mut k, _) = boot();
    let idle = k.sched.idle();
    k.timer_tick();
    assert_eq!(k.current(), Some(idle));
    assert_eq!(host(&k).switches.len(), 1);

    k.idle_once();
    k.idle_once();
    assert_eq!(host(&k).halted, 2);
    assert_eq!(k.ticks(), 1);
}

#[test]
fn test_stale_entries_are_dropped() {
    let (mut k, _) = boot();
    let a = ThreadRef::new(k.spawn_kernel("a", 0x1000), 0);
    let b = ThreadRef::new(k.spawn_kernel("b", 0x2000), 0);
    let ghost = ThreadRef::new(42, 0);

    // a 的状态被改掉但仍留在运行队列里
    k.set_thread_state(a, ThreadState::Sleeping);
    k.sched.run_queue.lock().push_back(ghost);

    k.timer_tick();
    assert_eq!(k.current(), Some(b));
    assert!(!k.sched.run_queue.lock().contains(a));
    assert_eq!(k.thread(a).unwrap().link, QueueLink::Detached);

    for _ in 0..TIME_SLICE_TICKS {
        k.timer_tick();
    }
    assert_eq!(k.current(), Some(b));
    assert_eq!(k.sched.run_queue.lock().snapshot(), [b]);
}

#[test]
#[should_panic(expected = "already linked")]
fn test_double_enqueue_is_fatal() {
    let (mut k, _) = boot();
    let a = ThreadRef::new(k.spawn_kernel("a", 0x1000), 0);
    k.sched_enqueue(a);
}

#[test]
fn test_switch_loads_user_address_space() {
    let (k, _) = boot_init();
    let init = ThreadRef::new(PID_INIT, 0);
    let table = k.process(PID_INIT).unwrap().memory.as_ref().unwrap().table;
    let thread = k.thread(init).unwrap();

    let machine = host(&k);
    assert_eq!(machine.active_table, Some(table));
    assert_eq!(machine.kernel_stack, thread.kstack.top());
    assert_eq!(machine.switches.last(), Some(&thread.kernel_sp));
}

#[test]
fn test_kernel_thread_keeps_address_space() {
    let (mut k, _) = boot_init();
    let table = k.process(PID_INIT).unwrap().memory.as_ref().unwrap().table;
    let kt = ThreadRef::new(k.spawn_kernel("kworker", 0x3000), 0);
    k.scheduler_switch(kt);
    assert_eq!(k.current(), Some(kt));
    // 内核线程不切换页表
    assert_eq!(host(&k).active_table, Some(table));
}

#[test]
fn test_blocked_current_is_replaced() {
    let (mut k, _) = boot();
    let a = ThreadRef::new(k.spawn_kernel("a", 0x1000), 0);
    let b = ThreadRef::new(k.spawn_kernel("b", 0x2000), 0);
    k.timer_tick();
    assert_eq!(k.current(), Some(a));

    k.wait_queue_block(a, WaitKey::Io(5));
    assert_eq!(k.current(), None);
    assert_eq!(k.thread(a).unwrap().link, QueueLink::WaitQueue(WaitKey::Io(5)));
    k.reschedule();
    assert_eq!(k.current(), Some(b));

    assert_eq!(k.wake_io(5), 1);
    let th = k.thread(a).unwrap();
    assert_eq!((th.state, th.link), (ThreadState::Ready, QueueLink::RunQueue));
    assert_eq!(k.wake_io(5), 0);
}

#[test]
fn test_dequeue_current_clears_it() {
    let (mut k, _) = boot();
    let a = ThreadRef::new(k.spawn_kernel("a", 0x1000), 0);
    k.timer_tick();
    k.sched_dequeue(a, false);
    assert_eq!(k.current(), Some(a));
    k.sched_enqueue(a);
    k.sched_dequeue(a, true);
    assert_eq!(k.current(), None);
    assert!(k.sched.run_queue.lock().is_empty());
}
