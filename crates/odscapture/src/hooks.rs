//! Fixed-function state toggles with observable listeners.
//!
//! Scene renderers toggle 2D texturing and fog through [`set_texture_2d`] and
//! [`set_fog`] instead of calling the backend directly. Listeners registered
//! through [`EventRegistrations`] see every toggle before it reaches the
//! fixed-function state; when at least one listener handles an event the
//! backend state is left untouched.
//!
//! The listener table is per thread, matching the single GPU thread that owns
//! the device.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;

use crate::error::UniformError;
use crate::gpu::GpuBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Texture2d { unit: u32, enabled: bool },
    Fog { enabled: bool },
}

impl StateEvent {
    pub fn kind(self) -> EventKind {
        match self {
            StateEvent::Texture2d { .. } => EventKind::Texture2d,
            StateEvent::Fog { .. } => EventKind::Fog,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Texture2d,
    Fog,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Rc<RefCell<dyn FnMut(&mut dyn GpuBackend, StateEvent) -> Result<(), UniformError>>>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    listeners: Vec<(ListenerId, EventKind, Listener)>,
}

thread_local! {
    static LISTENERS: RefCell<ListenerTable> = RefCell::new(ListenerTable::default());
}

/// Enables or disables 2D texturing on `unit`.
pub fn set_texture_2d(
    gpu: &mut dyn GpuBackend,
    unit: u32,
    enabled: bool,
) -> Result<(), UniformError> {
    if !dispatch(gpu, StateEvent::Texture2d { unit, enabled })? {
        gpu.set_texture_2d_state(unit, enabled);
    }
    Ok(())
}

pub fn set_fog(gpu: &mut dyn GpuBackend, enabled: bool) -> Result<(), UniformError> {
    if !dispatch(gpu, StateEvent::Fog { enabled })? {
        gpu.set_fog_state(enabled);
    }
    Ok(())
}

/// Number of listeners on this thread for `kind`.
pub fn listener_count(kind: EventKind) -> usize {
    LISTENERS.with(|table| {
        table
            .borrow()
            .listeners
            .iter()
            .filter(|(_, registered, _)| *registered == kind)
            .count()
    })
}

/// Runs every listener for the event in registration order. Returns whether
/// any listener saw it.
fn dispatch(gpu: &mut dyn GpuBackend, event: StateEvent) -> Result<bool, UniformError> {
    // Snapshot so listeners may (un)register while running.
    let listeners: Vec<Listener> = LISTENERS.with(|table| {
        table
            .borrow()
            .listeners
            .iter()
            .filter(|(_, kind, _)| *kind == event.kind())
            .map(|(_, _, listener)| Rc::clone(listener))
            .collect()
    });
    for listener in &listeners {
        // A listener that toggles state itself does not see its own event.
        let Ok(mut callback) = listener.try_borrow_mut() else {
            continue;
        };
        (&mut *callback)(&mut *gpu, event)?;
    }
    Ok(!listeners.is_empty())
}

/// Scoped set of listeners; everything still registered is removed on drop.
#[derive(Debug, Default)]
pub struct EventRegistrations {
    ids: Vec<ListenerId>,
    _thread_bound: PhantomData<Rc<()>>,
}

impl EventRegistrations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_texture_2d<F>(&mut self, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut dyn GpuBackend, u32, bool) -> Result<(), UniformError> + 'static,
    {
        self.register(EventKind::Texture2d, move |gpu, event| match event {
            StateEvent::Texture2d { unit, enabled } => listener(gpu, unit, enabled),
            StateEvent::Fog { .. } => Ok(()),
        })
    }

    pub fn on_fog<F>(&mut self, mut listener: F) -> ListenerId
    where
        F: FnMut(&mut dyn GpuBackend, bool) -> Result<(), UniformError> + 'static,
    {
        self.register(EventKind::Fog, move |gpu, event| match event {
            StateEvent::Fog { enabled } => listener(gpu, enabled),
            StateEvent::Texture2d { .. } => Ok(()),
        })
    }

    pub fn register<F>(&mut self, kind: EventKind, listener: F) -> ListenerId
    where
        F: FnMut(&mut dyn GpuBackend, StateEvent) -> Result<(), UniformError> + 'static,
    {
        let listener: Listener = Rc::new(RefCell::new(listener));
        let id = LISTENERS.with(|table| {
            let mut table = table.borrow_mut();
            table.next_id += 1;
            let id = ListenerId(table.next_id);
            table.listeners.push((id, kind, listener));
            id
        });
        self.ids.push(id);
        id
    }

    /// Removes one listener owned by this set. Returns false for ids it
    /// does not own.
    pub fn unregister(&mut self, id: ListenerId) -> bool {
        let Some(position) = self.ids.iter().position(|owned| *owned == id) else {
            return false;
        };
        self.ids.remove(position);
        remove_listeners(&[id]);
        true
    }

    pub fn unregister_all(&mut self) {
        remove_listeners(&self.ids);
        self.ids.clear();
    }

    pub fn is_registered(&self, id: ListenerId) -> bool {
        self.ids.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for EventRegistrations {
    fn drop(&mut self) {
        self.unregister_all();
    }
}

fn remove_listeners(ids: &[ListenerId]) {
    if ids.is_empty() {
        return;
    }
    // The table may already be gone during thread teardown.
    let _ = LISTENERS.try_with(|table| {
        table
            .borrow_mut()
            .listeners
            .retain(|(id, _, _)| !ids.contains(id));
    });
}
