//! 有界工作队列
//!
//! 所有 worker 共享的 FIFO 队列；优先级排序在入队前由引擎完成，队列本身只保证 FIFO。
//! 关闭时向每个 worker 投递一枚毒丸（Poison），收到的 worker 退出循环。

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

use crate::engine::error::EngineError;
use crate::engine::task::TaskId;

/// 队列条目
#[derive(Debug)]
pub enum QueueItem {
    /// 待派发任务 (session_id, task_id)
    Task(String, TaskId),
    /// 关闭信号
    Poison,
}

/// 有界 FIFO 工作队列（多 worker 共享消费端）
pub struct WorkQueue {
    tx: mpsc::Sender<QueueItem>,
    rx: Mutex<mpsc::Receiver<QueueItem>>,
    /// mpsc 不暴露长度，自行计数供状态查询
    depth: AtomicUsize,
    capacity: usize,
}

impl WorkQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
            depth: AtomicUsize::new(0),
            capacity,
        }
    }

    /// 入队；在 wait 内未获得空位则返回 QueueFull（有界等待，不会静默死锁）
    pub async fn enqueue(&self, item: QueueItem, wait: Duration) -> Result<(), EngineError> {
        // 毒丸不计入深度：depth 只反映待派发任务数
        let is_task = matches!(item, QueueItem::Task(..));
        match timeout(wait, self.tx.send(item)).await {
            Ok(Ok(())) => {
                if is_task {
                    self.depth.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
            // 等待超时或通道关闭都视为无法接纳
            _ => Err(EngineError::QueueFull),
        }
    }

    /// 出队；wait 内无条目返回 None（非错误），供空闲 worker 回查运行标志
    pub async fn dequeue(&self, wait: Duration) -> Option<QueueItem> {
        let recv = async {
            let mut rx = self.rx.lock().await;
            rx.recv().await
        };
        match timeout(wait, recv).await {
            Ok(Some(item)) => {
                if matches!(item, QueueItem::Task(..)) {
                    self.depth.fetch_sub(1, Ordering::Relaxed);
                }
                Some(item)
            }
            _ => None,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
