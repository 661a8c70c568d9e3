use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Default number of cells allocated per data space
pub const DEFAULT_SPACE_SIZE: usize = 0x10000;

/// Sentinel returned when a read or write extends past the end of a data space
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct AddressOutOfBounds;

impl std::fmt::Display for AddressOutOfBounds {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("address range extends past the end of the data space")
    }
}

impl std::error::Error for AddressOutOfBounds {}

/// Identifies where a wire-writable mutation originated
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteOrigin {
    /// The write was performed through the API, not the wire protocol
    Internal,
    /// The write was driven by a remote client at this address
    Remote(SocketAddr),
}

/// Range of cells whose value actually changed during a single mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataChange {
    /// A contiguous run of coils changed
    Coils {
        /// Address of the first changed coil
        start: u16,
        /// New values, one per changed coil
        values: Vec<bool>,
    },
    /// A contiguous run of holding registers changed
    HoldingRegisters {
        /// Address of the first changed register
        start: u16,
        /// New values, one per changed register
        values: Vec<u16>,
    },
}

/// Record passed to subscribers after a mutation commits
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeNotice {
    /// What changed
    pub change: DataChange,
    /// Who changed it
    pub origin: WriteOrigin,
}

/// Token returned by [`DataBank::subscribe`], used to unsubscribe
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Subscription(u64);

type Callback = Arc<dyn Fn(&ChangeNotice) + Send + Sync>;

/// Thread-safe in-memory Modbus data model with four independent spaces.
///
/// Every get/set is atomic with respect to concurrent callers. Each space has
/// its own lock so unrelated mutations proceed concurrently. Mutations of the
/// wire-writable spaces (coils and holding registers) notify subscribers with
/// the exact runs of cells that changed, after the space lock is released, so
/// callbacks may freely read the bank.
pub struct DataBank {
    coils: RwLock<Vec<bool>>,
    discrete_inputs: RwLock<Vec<bool>>,
    holding_registers: RwLock<Vec<u16>>,
    input_registers: RwLock<Vec<u16>>,
    next_token: AtomicU64,
    subscribers: Mutex<Vec<(u64, Callback)>>,
}

impl Default for DataBank {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBank {
    /// Create a data bank with the default capacity (65536) for every space
    pub fn new() -> Self {
        Self::with_sizes(
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
            DEFAULT_SPACE_SIZE,
        )
    }

    /// Create a data bank with a fixed capacity per space.
    ///
    /// The spaces never resize. Capacities above 65536 are clamped since
    /// addresses on the wire are 16-bit.
    pub fn with_sizes(
        coils: usize,
        discrete_inputs: usize,
        holding_registers: usize,
        input_registers: usize,
    ) -> Self {
        Self {
            coils: RwLock::new(vec![false; coils.min(DEFAULT_SPACE_SIZE)]),
            discrete_inputs: RwLock::new(vec![false; discrete_inputs.min(DEFAULT_SPACE_SIZE)]),
            holding_registers: RwLock::new(vec![0; holding_registers.min(DEFAULT_SPACE_SIZE)]),
            input_registers: RwLock::new(vec![0; input_registers.min(DEFAULT_SPACE_SIZE)]),
            next_token: AtomicU64::new(0),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Read a range of coils
    pub fn get_coils(&self, start: u16, qty: u16) -> Result<Vec<bool>, AddressOutOfBounds> {
        get_range(&self.coils, start, qty)
    }

    /// Read a range of discrete inputs
    pub fn get_discrete_inputs(
        &self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<bool>, AddressOutOfBounds> {
        get_range(&self.discrete_inputs, start, qty)
    }

    /// Read a range of holding registers
    pub fn get_holding_registers(
        &self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<u16>, AddressOutOfBounds> {
        get_range(&self.holding_registers, start, qty)
    }

    /// Read a range of input registers
    pub fn get_input_registers(
        &self,
        start: u16,
        qty: u16,
    ) -> Result<Vec<u16>, AddressOutOfBounds> {
        get_range(&self.input_registers, start, qty)
    }

    /// Write a range of coils, notifying subscribers of any changes
    pub fn set_coils(
        &self,
        start: u16,
        values: &[bool],
        origin: WriteOrigin,
    ) -> Result<(), AddressOutOfBounds> {
        let runs = set_range_tracked(&self.coils, start, values)?;
        for (start, values) in runs {
            self.notify(ChangeNotice {
                change: DataChange::Coils { start, values },
                origin,
            });
        }
        Ok(())
    }

    /// Write a range of discrete inputs
    pub fn set_discrete_inputs(
        &self,
        start: u16,
        values: &[bool],
    ) -> Result<(), AddressOutOfBounds> {
        set_range(&self.discrete_inputs, start, values)
    }

    /// Write a range of holding registers, notifying subscribers of any changes
    pub fn set_holding_registers(
        &self,
        start: u16,
        values: &[u16],
        origin: WriteOrigin,
    ) -> Result<(), AddressOutOfBounds> {
        let runs = set_range_tracked(&self.holding_registers, start, values)?;
        for (start, values) in runs {
            self.notify(ChangeNotice {
                change: DataChange::HoldingRegisters { start, values },
                origin,
            });
        }
        Ok(())
    }

    /// Write a range of input registers
    pub fn set_input_registers(&self, start: u16, values: &[u16]) -> Result<(), AddressOutOfBounds> {
        set_range(&self.input_registers, start, values)
    }

    /// Register a callback invoked synchronously after each coil or holding
    /// register mutation commits
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&ChangeNotice) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.subscribers
            .lock()
            .unwrap()
            .push((token, Arc::new(callback)));
        Subscription(token)
    }

    /// Remove a previously registered callback, returning true if it was present
    pub fn unsubscribe(&self, token: Subscription) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap();
        let before = subscribers.len();
        subscribers.retain(|(id, _)| *id != token.0);
        subscribers.len() != before
    }

    fn notify(&self, notice: ChangeNotice) {
        // snapshot the callbacks so none of the bank's locks are held while
        // they run, which also permits re-entrant subscribe/unsubscribe
        let snapshot: Vec<Callback> = {
            let subscribers = self.subscribers.lock().unwrap();
            subscribers.iter().map(|(_, cb)| cb.clone()).collect()
        };
        for callback in snapshot {
            callback(&notice);
        }
    }
}

fn get_range<T: Copy>(
    lock: &RwLock<Vec<T>>,
    start: u16,
    qty: u16,
) -> Result<Vec<T>, AddressOutOfBounds> {
    let space = lock.read().unwrap();
    let start = start as usize;
    let end = start
        .checked_add(qty as usize)
        .ok_or(AddressOutOfBounds)?;
    space
        .get(start..end)
        .map(|cells| cells.to_vec())
        .ok_or(AddressOutOfBounds)
}

fn set_range<T: Copy>(
    lock: &RwLock<Vec<T>>,
    start: u16,
    values: &[T],
) -> Result<(), AddressOutOfBounds> {
    let mut space = lock.write().unwrap();
    let start = start as usize;
    let end = start
        .checked_add(values.len())
        .ok_or(AddressOutOfBounds)?;
    let cells = space.get_mut(start..end).ok_or(AddressOutOfBounds)?;
    cells.copy_from_slice(values);
    Ok(())
}

/// Write values and return one (start, values) run per contiguous span of
/// cells whose value actually changed
fn set_range_tracked<T: Copy + PartialEq>(
    lock: &RwLock<Vec<T>>,
    start: u16,
    values: &[T],
) -> Result<Vec<(u16, Vec<T>)>, AddressOutOfBounds> {
    let mut space = lock.write().unwrap();
    let begin = start as usize;
    let end = begin
        .checked_add(values.len())
        .ok_or(AddressOutOfBounds)?;
    let cells = space.get_mut(begin..end).ok_or(AddressOutOfBounds)?;

    let mut runs: Vec<(u16, Vec<T>)> = Vec::new();
    for (offset, (cell, value)) in cells.iter_mut().zip(values.iter()).enumerate() {
        if *cell != *value {
            *cell = *value;
            let address = start + offset as u16;
            match runs.last_mut() {
                Some((run_start, run)) if (*run_start as usize) + run.len() == address as usize => {
                    run.push(*value)
                }
                _ => runs.push((address, vec![*value])),
            }
        }
    }
    Ok(runs)
}
