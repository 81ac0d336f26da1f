use crate::utils::*;
use crate::process::Process;

/// Thread-safe FIFO of processes waiting for a core.
#[derive(Default)]
pub struct ReadyQueue {
    inner:  Mutex<VecDeque<Arc<Process>>>,
    cv:     Condvar,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, p: Arc<Process>) {
        lock(&self.inner).push_back(p);
        self.cv.notify_one();
    }

    pub fn peek(&self) -> Option<Arc<Process>> {
        lock(&self.inner).front().cloned()
    }

    pub fn try_pop(&self) -> Option<Arc<Process>> {
        lock(&self.inner).pop_front()
    }

    /// Waits at most `timeout` for something to show up. Returns `None`
    /// on an empty queue instead of blocking forever, so callers get a
    /// chance to look at their shutdown flag.
    pub fn pop_timeout(&self, timeout: Duration) -> Option<Arc<Process>> {
        let q = lock(&self.inner);
        let mut q = match self.cv.wait_timeout_while(q, timeout, |q| q.is_empty()) {
            Ok((g, _))  => { g },
            Err(p)      => { p.into_inner().0 }
        };
        q.pop_front()
    }

    /// Moves the head to the back. Returns the moved process.
    pub fn rotate(&self) -> Option<Arc<Process>> {
        let mut q = lock(&self.inner);
        let head = q.pop_front()?;
        q.push_back(head.clone());
        Some(head)
    }

    /// Pops the head only if it is `p`. Guards against the head having
    /// changed between a peek and the pop.
    pub fn pop_if(&self, p: &Arc<Process>) -> bool {
        let mut q = lock(&self.inner);
        match q.front() {
            Some(h) if Arc::ptr_eq(h, p)    => {
                q.pop_front();
                true
            },
            _                               => { false }
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).is_empty()
    }

    pub fn contains(&self, p: &Arc<Process>) -> bool {
        lock(&self.inner).iter().any(|q| Arc::ptr_eq(q, p))
    }

    /// Names in queue order.
    pub fn names(&self) -> Vec<String> {
        lock(&self.inner).iter().map(|p| p.name.clone()).collect()
    }
}
