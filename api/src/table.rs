use fsctx_core::{FsContext, FsError, Interrupt};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One open descriptor: an owning reference to exactly one context plus the
/// descriptor-level close-on-exec flag.
pub struct ContextFile {
    context: Arc<FsContext>,
    cloexec: bool,
}

impl ContextFile {
    pub fn context(&self) -> &Arc<FsContext> {
        &self.context
    }

    pub fn close_on_exec(&self) -> bool {
        self.cloexec
    }

    /// Drain one diagnostic line into `buf`, returning the byte count.
    ///
    /// The line is popped before its size is checked, so a line longer than
    /// `buf` is consumed and lost. Callers wanting every message must supply
    /// a buffer at least as large as the longest line a driver emits.
    pub async fn read(&self, buf: &mut [u8], intr: &Interrupt) -> Result<usize, FsError> {
        let line = {
            let _state = self.context.lock_uapi(intr).await?;
            match self.context.log().pop_front() {
                Some(line) => line,
                None => return Err(FsError::NoData),
            }
        };
        let bytes = line.as_bytes();
        if bytes.len() > buf.len() {
            return Err(FsError::MessageTooLarge);
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }
}

/// The descriptor table binding numbers to live contexts. Numbers are never
/// reused within one table's lifetime, so a number kept across a close
/// cannot alias a newer binding.
pub struct ContextTable {
    entries: Mutex<TableState>,
}

struct TableState {
    bindings: HashMap<u32, Arc<ContextFile>>,
    // Numbers below 3 are left to the conventional standard streams.
    next: u32,
}

impl ContextTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(TableState {
                bindings: HashMap::new(),
                next: 3,
            }),
        }
    }

    /// Bind a context, returning its new descriptor number.
    pub fn bind(&self, context: Arc<FsContext>, cloexec: bool) -> u32 {
        let mut table = self.entries.lock().expect("context table mutex poisoned");
        let fd = table.next;
        table.next += 1;
        table
            .bindings
            .insert(fd, Arc::new(ContextFile { context, cloexec }));
        fd
    }

    /// Look up a descriptor, failing if it is not one of ours.
    pub fn get(&self, fd: u32) -> Result<Arc<ContextFile>, FsError> {
        let table = self.entries.lock().expect("context table mutex poisoned");
        table
            .bindings
            .get(&fd)
            .cloned()
            .ok_or(FsError::BadDescriptor(fd))
    }

    /// Duplicate a descriptor. The copy shares the context and starts with
    /// close-on-exec cleared, as descriptor duplication conventionally does.
    pub fn dup(&self, fd: u32) -> Result<u32, FsError> {
        let mut table = self.entries.lock().expect("context table mutex poisoned");
        let context = table
            .bindings
            .get(&fd)
            .ok_or(FsError::BadDescriptor(fd))?
            .context
            .clone();
        let new_fd = table.next;
        table.next += 1;
        table.bindings.insert(
            new_fd,
            Arc::new(ContextFile {
                context,
                cloexec: false,
            }),
        );
        Ok(new_fd)
    }

    /// Remove a binding, dropping its context reference. Removal from the
    /// table is the single release point, so a repeated close of the same
    /// number reports a bad descriptor instead of releasing twice.
    pub fn close(&self, fd: u32) -> Result<(), FsError> {
        let mut table = self.entries.lock().expect("context table mutex poisoned");
        match table.bindings.remove(&fd) {
            Some(_) => Ok(()),
            None => Err(FsError::BadDescriptor(fd)),
        }
    }
}

impl Default for ContextTable {
    fn default() -> Self {
        Self::new()
    }
}
