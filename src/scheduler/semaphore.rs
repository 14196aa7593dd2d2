use alloc::collections::VecDeque;

/// Counting semaphore whose waiters are process-table slots.
///
/// The semaphore only keeps the queue; the process table flips the
/// BLOCKED/READY status of whichever slot it returns.
#[derive(Debug, Default)]
pub struct Semaphore {
    value: i32,
    waiters: VecDeque<usize>,
}

impl Semaphore {
    pub fn new(value: i32) -> Self {
        Semaphore {
            value,
            waiters: VecDeque::new(),
        }
    }

    pub fn value(&self) -> i32 {
        self.value
    }

    /// P: returns `true` when `slot` has been queued and must block.
    pub fn p(&mut self, slot: usize) -> bool {
        self.value -= 1;
        if self.value < 0 {
            self.waiters.push_back(slot);
            true
        } else {
            false
        }
    }

    /// V: returns the slot to wake, oldest waiter first.
    pub fn v(&mut self) -> Option<usize> {
        self.value += 1;
        if self.value <= 0 {
            self.waiters.pop_front()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Semaphore;

    #[test]
    fn waiters_are_woken_in_order() {
        let mut sem = Semaphore::new(1);
        assert!(!sem.p(1));
        assert!(sem.p(2));
        assert!(sem.p(3));
        assert_eq!(sem.value(), -2);
        assert_eq!(sem.v(), Some(2));
        assert_eq!(sem.v(), Some(3));
        assert_eq!(sem.v(), None);
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn v_before_p_is_remembered() {
        let mut sem = Semaphore::new(0);
        assert_eq!(sem.v(), None);
        assert!(!sem.p(4));
    }
}
