//! Header hooks run around every transport message.

use std::fmt;
use std::sync::Arc;

use courier_core::Headers;
use parking_lot::RwLock;
use tracing::error;

/// Inspects the headers of every inbound message before dispatch.
pub type ReadHeadersAction = Arc<dyn Fn(&Headers) + Send + Sync>;

/// Contributes headers to every outbound message.
pub type WriteHeadersFunc = Arc<dyn Fn() -> Headers + Send + Sync>;

#[derive(Default)]
pub(crate) struct HeaderHooks {
    read: RwLock<Vec<ReadHeadersAction>>,
    write: RwLock<Vec<WriteHeadersFunc>>,
}

impl HeaderHooks {
    pub(crate) fn add_read(&self, action: ReadHeadersAction) {
        self.read.write().push(action);
    }

    pub(crate) fn add_write(&self, func: WriteHeadersFunc) {
        self.write.write().push(func);
    }

    /// Runs every read action, in registration order.
    pub(crate) fn read(&self, headers: &Headers) {
        let actions = self.read.read().clone();
        for action in actions {
            action(headers);
        }
    }

    /// Merges the output of every write function.
    ///
    /// The first value for a key wins; later duplicates are logged and
    /// discarded.
    pub(crate) fn collect(&self) -> Headers {
        let funcs = self.write.read().clone();
        let mut headers = Headers::new();
        for func in funcs {
            for (key, value) in func() {
                if headers.contains_key(&key) {
                    error!(
                        key = %key,
                        discarded = %value,
                        "Header already exists, discarding value. Use unique header keys only"
                    );
                    continue;
                }
                headers.insert(key, value);
            }
        }
        headers
    }
}

impl fmt::Debug for HeaderHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeaderHooks")
            .field("read", &self.read.read().len())
            .field("write", &self.write.read().len())
            .finish()
    }
}
