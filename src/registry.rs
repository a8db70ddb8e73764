use parking_lot::Mutex;
use std::sync::Arc;

/// Process-wide count of open camera streams.
///
/// The lock is only held for the increment or decrement itself.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    active: Arc<Mutex<usize>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a new session. The returned guard uncounts it when dropped.
    pub fn begin(&self) -> SessionGuard {
        let mut active = self.active.lock();
        *active += 1;
        tracing::debug!("Camera session started, {} active", *active);

        SessionGuard {
            registry: self.clone(),
        }
    }

    pub fn active_clients(&self) -> usize {
        *self.active.lock()
    }

    fn end(&self) {
        let mut active = self.active.lock();
        *active = active.saturating_sub(1);
        tracing::debug!("Camera session ended, {} active", *active);
    }
}

/// Membership of one session in the registry.
#[derive(Debug)]
pub struct SessionGuard {
    registry: SessionRegistry,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.registry.end();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guards_count_sessions() {
        let registry = SessionRegistry::new();
        assert_eq!(registry.active_clients(), 0);

        let first = registry.begin();
        let second = registry.begin();
        assert_eq!(registry.active_clients(), 2);

        drop(first);
        assert_eq!(registry.active_clients(), 1);
        drop(second);
        assert_eq!(registry.active_clients(), 0);
    }

    #[test]
    fn test_concurrent_sessions_return_to_zero() {
        let registry = SessionRegistry::new();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let _guard = registry.begin();
                        assert!(registry.active_clients() >= 1);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.active_clients(), 0);
    }

    #[test]
    fn test_guard_released_on_panic() {
        let registry = SessionRegistry::new();
        let inner = registry.clone();

        let result = std::thread::spawn(move || {
            let _guard = inner.begin();
            panic!("processing fault");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(registry.active_clients(), 0);
    }
}
