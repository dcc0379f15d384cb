mod conflict;
mod error;
mod mutations;
mod queries;
mod validate;

pub use conflict::{has_conflict, now_ms};
pub use error::{EngineError, EntityKind};
pub use queries::ReservationFilter;
pub use validate::{
    Field, ValidationReport, validate_customer, validate_reservation, validate_vehicle,
};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedCustomer = Arc<RwLock<Customer>>;
pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            flush_and_respond(&mut wal, &mut batch);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    flush_and_respond(&mut wal, &mut batch);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_and_respond(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    respond_batch(batch, &result);
}

fn flush_batch(
    wal: &mut Wal,
    batch: &mut [(Event, oneshot::Sender<io::Result<()>>)],
) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

/// The booking ledger: customers, vehicles, and conflict-checked reservations.
///
/// Reservations live inside their vehicle's `VehicleState`; the state's
/// `RwLock` is the single-writer-per-vehicle serialization point that makes
/// the conflict-check-then-insert sequence atomic. Lock order is always
/// customer before vehicle, vehicles sorted by id when more than one is held.
pub struct Engine {
    pub(super) customers: DashMap<Ulid, SharedCustomer>,
    pub(super) vehicles: DashMap<Ulid, SharedVehicleState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation id → vehicle id.
    pub(super) reservation_to_vehicle: DashMap<Ulid, Ulid>,
    /// Customer → owned vehicles, for O(1) cascade and filtered listing.
    pub(super) vehicles_by_customer: DashMap<Ulid, Vec<Ulid>>,
    /// Customer → reservations booked by them (on any vehicle).
    pub(super) reservations_by_customer: DashMap<Ulid, Vec<Ulid>>,
    /// Unique email → customer id.
    pub(super) email_index: DashMap<String, Ulid>,
    /// Unique license plate → vehicle id.
    pub(super) plate_index: DashMap<String, Ulid>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            customers: DashMap::new(),
            vehicles: DashMap::new(),
            wal_tx,
            notify,
            reservation_to_vehicle: DashMap::new(),
            vehicles_by_customer: DashMap::new(),
            reservations_by_customer: DashMap::new(),
            email_index: DashMap::new(),
            plate_index: DashMap::new(),
        };

        // Replay — we're the sole owner of every Arc here, so try_read/try_write
        // always succeed instantly. Never use blocking_read/blocking_write: this
        // may run inside an async context.
        for event in &events {
            engine.replay_event(event);
        }

        Ok(engine)
    }

    fn replay_event(&self, event: &Event) {
        match event {
            Event::CustomerCreated { id, name, email, phone } => {
                let customer = Customer {
                    id: *id,
                    name: name.clone(),
                    email: email.clone(),
                    phone: phone.clone(),
                };
                self.email_index.insert(email.clone(), *id);
                self.customers.insert(*id, Arc::new(RwLock::new(customer)));
            }
            Event::CustomerUpdated { id, name, email, phone } => {
                if let Some(entry) = self.customers.get(id) {
                    let arc = entry.value().clone();
                    drop(entry);
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    if guard.email != *email {
                        self.email_index.remove(&guard.email);
                        self.email_index.insert(email.clone(), *id);
                    }
                    guard.name = name.clone();
                    guard.email = email.clone();
                    guard.phone = phone.clone();
                }
            }
            Event::CustomerDeleted { id } => self.replay_delete_customer(*id),
            Event::VehicleCreated {
                id,
                customer_id,
                make,
                model,
                year,
                color,
                license_plate,
            } => {
                let vehicle = Vehicle {
                    id: *id,
                    customer_id: *customer_id,
                    make: make.clone(),
                    model: model.clone(),
                    year: *year,
                    color: color.clone(),
                    license_plate: license_plate.clone(),
                };
                self.plate_index.insert(license_plate.clone(), *id);
                self.vehicles_by_customer.entry(*customer_id).or_default().push(*id);
                self.vehicles
                    .insert(*id, Arc::new(RwLock::new(VehicleState::new(vehicle))));
            }
            Event::VehicleUpdated {
                id,
                customer_id,
                make,
                model,
                year,
                color,
                license_plate,
            } => {
                if let Some(entry) = self.vehicles.get(id) {
                    let arc = entry.value().clone();
                    drop(entry);
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    if guard.vehicle.license_plate != *license_plate {
                        self.plate_index.remove(&guard.vehicle.license_plate);
                        self.plate_index.insert(license_plate.clone(), *id);
                    }
                    if guard.vehicle.customer_id != *customer_id {
                        self.remove_owned_vehicle(guard.vehicle.customer_id, *id);
                        self.vehicles_by_customer.entry(*customer_id).or_default().push(*id);
                    }
                    guard.vehicle = Vehicle {
                        id: *id,
                        customer_id: *customer_id,
                        make: make.clone(),
                        model: model.clone(),
                        year: *year,
                        color: color.clone(),
                        license_plate: license_plate.clone(),
                    };
                }
            }
            Event::VehicleDeleted { id } => self.replay_delete_vehicle(*id),
            Event::ReservationCreated {
                id,
                customer_id,
                vehicle_id,
                span,
                status,
            } => {
                if let Some(entry) = self.vehicles.get(vehicle_id) {
                    let arc = entry.value().clone();
                    drop(entry);
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    let reservation = Reservation {
                        id: *id,
                        customer_id: *customer_id,
                        vehicle_id: *vehicle_id,
                        span: *span,
                        status: *status,
                    };
                    self.link_reservation(&reservation);
                    guard.insert_reservation(reservation);
                }
            }
            Event::ReservationUpdated {
                id,
                customer_id,
                vehicle_id,
                span,
                status,
            } => {
                let Some(old_vid) = self.reservation_to_vehicle.get(id).map(|e| *e.value())
                else {
                    return;
                };
                let old = self.vehicles.get(&old_vid).map(|e| e.value().clone());
                let previous = old.and_then(|arc| {
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    guard.remove_reservation(*id)
                });
                if let Some(prev) = previous {
                    self.unlink_reservation(*id, prev.customer_id);
                }
                if let Some(entry) = self.vehicles.get(vehicle_id) {
                    let arc = entry.value().clone();
                    drop(entry);
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    let reservation = Reservation {
                        id: *id,
                        customer_id: *customer_id,
                        vehicle_id: *vehicle_id,
                        span: *span,
                        status: *status,
                    };
                    self.link_reservation(&reservation);
                    guard.insert_reservation(reservation);
                }
            }
            Event::ReservationDeleted { id } => {
                let Some(vid) = self.reservation_to_vehicle.get(id).map(|e| *e.value()) else {
                    return;
                };
                if let Some(entry) = self.vehicles.get(&vid) {
                    let arc = entry.value().clone();
                    drop(entry);
                    let mut guard = arc.try_write().expect("replay: uncontended write");
                    if let Some(removed) = guard.remove_reservation(*id) {
                        self.unlink_reservation(*id, removed.customer_id);
                    }
                }
            }
        }
    }

    /// Cascade a customer deletion against uncontended state (replay path).
    /// The live path in mutations.rs performs the same steps under real locks.
    fn replay_delete_customer(&self, id: Ulid) {
        for vid in self.owned_vehicles(id) {
            self.replay_delete_vehicle(vid);
        }
        // Remaining reservations this customer holds on other owners' vehicles.
        let leftover: Vec<Ulid> = self
            .reservations_by_customer
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for rid in leftover {
            if let Some(vid) = self.reservation_to_vehicle.get(&rid).map(|e| *e.value())
                && let Some(entry) = self.vehicles.get(&vid)
            {
                let arc = entry.value().clone();
                drop(entry);
                let mut guard = arc.try_write().expect("replay: uncontended write");
                guard.remove_reservation(rid);
                self.reservation_to_vehicle.remove(&rid);
            }
        }
        self.reservations_by_customer.remove(&id);
        self.vehicles_by_customer.remove(&id);
        if let Some((_, arc)) = self.customers.remove(&id) {
            let guard = arc.try_read().expect("replay: uncontended read");
            self.email_index.remove(&guard.email);
        }
    }

    fn replay_delete_vehicle(&self, id: Ulid) {
        if let Some((_, arc)) = self.vehicles.remove(&id) {
            let guard = arc.try_read().expect("replay: uncontended read");
            for r in &guard.reservations {
                self.unlink_reservation(r.id, r.customer_id);
            }
            self.plate_index.remove(&guard.vehicle.license_plate);
            self.remove_owned_vehicle(guard.vehicle.customer_id, id);
        }
    }

    // ── Index maintenance ────────────────────────────────────

    pub(super) fn link_reservation(&self, r: &Reservation) {
        self.reservation_to_vehicle.insert(r.id, r.vehicle_id);
        self.reservations_by_customer
            .entry(r.customer_id)
            .or_default()
            .push(r.id);
    }

    pub(super) fn unlink_reservation(&self, id: Ulid, customer_id: Ulid) {
        self.reservation_to_vehicle.remove(&id);
        if let Some(mut list) = self.reservations_by_customer.get_mut(&customer_id) {
            list.retain(|r| *r != id);
        }
    }

    pub(super) fn remove_owned_vehicle(&self, customer_id: Ulid, vehicle_id: Ulid) {
        if let Some(mut list) = self.vehicles_by_customer.get_mut(&customer_id) {
            list.retain(|v| *v != vehicle_id);
        }
    }

    pub(super) fn owned_vehicles(&self, customer_id: Ulid) -> Vec<Ulid> {
        self.vehicles_by_customer
            .get(&customer_id)
            .map(|e| e.value().clone())
            .unwrap_or_default()
    }

    // ── Accessors ────────────────────────────────────────────

    pub fn get_customer_arc(&self, id: &Ulid) -> Option<SharedCustomer> {
        self.customers.get(id).map(|e| e.value().clone())
    }

    pub fn get_vehicle_arc(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn customer_exists(&self, id: &Ulid) -> bool {
        self.customers.contains_key(id)
    }

    pub fn vehicle_exists(&self, id: &Ulid) -> bool {
        self.vehicles.contains_key(id)
    }

    pub fn vehicle_of_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_to_vehicle
            .get(reservation_id)
            .map(|e| *e.value())
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate
    /// the current state: customers first, then vehicles, then reservations,
    /// so foreign keys always resolve on replay.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        let mut customer_arcs: Vec<SharedCustomer> =
            self.customers.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(customer_arcs.len());
        for arc in customer_arcs.drain(..) {
            snapshots.push(arc.read().await.clone());
        }
        snapshots.sort_by_key(|c| c.id);
        for c in &snapshots {
            events.push(Event::CustomerCreated {
                id: c.id,
                name: c.name.clone(),
                email: c.email.clone(),
                phone: c.phone.clone(),
            });
        }

        let vehicle_arcs: Vec<SharedVehicleState> =
            self.vehicles.iter().map(|e| e.value().clone()).collect();
        let mut states = Vec::with_capacity(vehicle_arcs.len());
        for arc in &vehicle_arcs {
            states.push(arc.read().await.clone());
        }
        states.sort_by_key(|s| s.vehicle.id);
        for state in &states {
            let v = &state.vehicle;
            events.push(Event::VehicleCreated {
                id: v.id,
                customer_id: v.customer_id,
                make: v.make.clone(),
                model: v.model.clone(),
                year: v.year,
                color: v.color.clone(),
                license_plate: v.license_plate.clone(),
            });
        }
        for state in &states {
            for r in &state.reservations {
                events.push(Event::ReservationCreated {
                    id: r.id,
                    customer_id: r.customer_id,
                    vehicle_id: r.vehicle_id,
                    span: r.span,
                    status: r.status,
                });
            }
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
