use std::task;
use std::vec;

/// Wakes every task that enrolled since the last notification.
pub struct Notifier {
    wakers: parking_lot::Mutex<vec::Vec<task::Waker>>,
}

impl Notifier {
    pub fn new() -> Notifier {
        Notifier {
            wakers: parking_lot::Mutex::new(vec::Vec::new()),
        }
    }

    pub fn notify(&self) {
        let wakers = std::mem::take(&mut *self.wakers.lock());

        for w in wakers {
            w.wake();
        }
    }

    pub fn enroll(&self, cx: &task::Context) {
        let waker = cx.waker();
        let mut wakers = self.wakers.lock();
        if !wakers.iter().any(|w| w.will_wake(waker)) {
            wakers.push(waker.clone());
        }
    }
}

impl Default for Notifier {
    fn default() -> Notifier {
        Notifier::new()
    }
}

impl std::ops::Drop for Notifier {
    fn drop(&mut self) {
        self.notify();
    }
}
