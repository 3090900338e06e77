//! One addressable Modbus value with optional access hooks.
//!
//! A cell stores a 16-bit value (bit banks use 0/1; callers mask) and can
//! carry a read hook projecting a live source into the address space and a
//! write hook vetting proposed values. Hooks run under whatever lock
//! protects the owning store and must not call back into it.

/// Read hook: receives the stored value, returns the value to report.
pub type ReadHook = Box<dyn FnMut(u16) -> u16 + Send>;

/// Write hook: receives the proposed value, returns 0 to accept or a
/// non-zero status to reject.
pub type WriteHook = Box<dyn FnMut(u16) -> i32 + Send>;

/// One addressable unit of the Modbus data model.
#[derive(Default)]
pub struct Cell {
    value: u16,
    read_hook: Option<ReadHook>,
    write_hook: Option<WriteHook>,
}

impl std::fmt::Debug for Cell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("value", &self.value)
            .field("read_hook", &self.read_hook.is_some())
            .field("write_hook", &self.write_hook.is_some())
            .finish()
    }
}

impl Cell {
    /// Create a cell holding 0 with no hooks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cell with an initial stored value.
    #[must_use]
    pub fn with_value(value: u16) -> Self {
        Self {
            value,
            ..Self::default()
        }
    }

    /// Read the cell.
    ///
    /// With a read hook bound, the hook sees the stored value and its
    /// result is stored back and returned, so a live source stays cached
    /// in the cell. Without one, the stored value is returned.
    pub fn get(&mut self) -> u16 {
        if let Some(hook) = self.read_hook.as_mut() {
            self.value = hook(self.value);
        }
        self.value
    }

    /// Write the cell.
    ///
    /// With a write hook bound, the hook vets the proposed value: on 0 the
    /// value is stored and 0 returned; otherwise the stored value is left
    /// untouched and the hook's status comes back. Without one, the value
    /// is always stored.
    pub fn set(&mut self, value: u16) -> i32 {
        match self.write_hook.as_mut() {
            Some(hook) => {
                let code = hook(value);
                if code == 0 {
                    self.value = value;
                }
                code
            }
            None => {
                self.value = value;
                0
            }
        }
    }

    /// Bind (or replace) the read hook.
    pub fn bind_read<F>(&mut self, hook: F)
    where
        F: FnMut(u16) -> u16 + Send + 'static,
    {
        self.read_hook = Some(Box::new(hook));
    }

    /// Bind (or replace) the write hook.
    pub fn bind_write<F>(&mut self, hook: F)
    where
        F: FnMut(u16) -> i32 + Send + 'static,
    {
        self.write_hook = Some(Box::new(hook));
    }

    /// Remove the read hook.
    pub fn unbind_read(&mut self) {
        self.read_hook = None;
    }

    /// Remove the write hook.
    pub fn unbind_write(&mut self) {
        self.write_hook = None;
    }

    /// The stored value, without invoking the read hook.
    #[must_use]
    pub fn stored(&self) -> u16 {
        self.value
    }

    /// Store a value directly, bypassing the write hook. This is the
    /// application-side injection path.
    pub fn set_stored(&mut self, value: u16) {
        self.value = value;
    }
}
