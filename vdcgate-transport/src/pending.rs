use std::collections::HashMap;
use tracing::{debug, warn};
use vdcgate_core::{ApiError, ApiValuePtr, MessageId, MessageIdAllocator};

/// Callback receiving the outcome of one outgoing call.
pub type ResponseHandler = Box<dyn FnOnce(Result<ApiValuePtr, ApiError>) + Send>;

/// Outstanding calls of one connection, keyed by locally allocated id.
pub struct PendingAnswers {
    ids: MessageIdAllocator,
    handlers: HashMap<MessageId, ResponseHandler>,
}

impl PendingAnswers {
    pub fn new() -> Self {
        PendingAnswers {
            ids: MessageIdAllocator::new(),
            handlers: HashMap::new(),
        }
    }

    /// Allocate the next id and remember `handler` for its response.
    pub fn register(&mut self, handler: ResponseHandler) -> MessageId {
        let mut id = self.ids.allocate();
        // after a wrap the id may still be waiting for an answer
        while self.handlers.contains_key(&id) {
            id = self.ids.allocate();
        }
        self.handlers.insert(id, handler);
        id
    }

    /// Deliver `outcome` to the handler registered for `id`. Returns `false`
    /// if no call with that id is outstanding.
    pub fn resolve(&mut self, id: MessageId, outcome: Result<ApiValuePtr, ApiError>) -> bool {
        match self.handlers.remove(&id) {
            Some(handler) => {
                debug!(id = id.as_u32(), ok = outcome.is_ok(), "Delivering response");
                handler(outcome);
                true
            }
            None => {
                warn!(id = id.as_u32(), "Response for unknown message id dropped");
                false
            }
        }
    }

    /// Remove the handler for `id` without calling it.
    pub fn take(&mut self, id: MessageId) -> Option<ResponseHandler> {
        self.handlers.remove(&id)
    }

    /// Fail every outstanding call with `error`, in id order.
    pub fn fail_all(&mut self, error: &ApiError) {
        let mut pending: Vec<_> = self.handlers.drain().collect();
        pending.sort_by_key(|(id, _)| *id);
        if !pending.is_empty() {
            debug!(count = pending.len(), "Failing outstanding calls");
        }
        for (_, handler) in pending {
            handler(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for PendingAnswers {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use vdcgate_core::{ApiValue, ErrorType, JsonApiValue};

    type Seen = Arc<Mutex<Vec<(u32, Result<i64, ErrorType>)>>>;

    fn recorder(seen: &Seen, tag: u32) -> ResponseHandler {
        let seen = seen.clone();
        Box::new(move |outcome| {
            let entry = outcome
                .map(|v| v.int64_value())
                .map_err(|e| e.error_type);
            seen.lock().unwrap().push((tag, entry));
        })
    }

    #[test]
    fn test_ids_increase_from_one() {
        let seen = Seen::default();
        let mut pending = PendingAnswers::new();
        let a = pending.register(recorder(&seen, 1));
        let b = pending.register(recorder(&seen, 2));
        assert_eq!(a.as_u32(), 1);
        assert_eq!(b.as_u32(), 2);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_resolve_removes_entry_exactly_once() {
        let seen = Seen::default();
        let mut pending = PendingAnswers::new();
        let id = pending.register(recorder(&seen, 1));

        assert!(pending.resolve(id, Ok(JsonApiValue::from_json(serde_json::json!(7)))));
        assert!(!pending.resolve(id, Ok(JsonApiValue::from_json(serde_json::json!(8)))));
        assert_eq!(*seen.lock().unwrap(), vec![(1, Ok(7))]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_fail_all_delivers_disconnected() {
        let seen = Seen::default();
        let mut pending = PendingAnswers::new();
        pending.register(recorder(&seen, 1));
        pending.register(recorder(&seen, 2));

        pending.fail_all(&ApiError::disconnected("gone"));
        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                (1, Err(ErrorType::Disconnected)),
                (2, Err(ErrorType::Disconnected))
            ]
        );
        assert!(pending.is_empty());
    }
}
