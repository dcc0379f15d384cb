use std::collections::HashSet;
use std::sync::Arc;

use chrono::{Datelike, Utc};
use dashmap::mapref::entry::Entry;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::observability::{MUTATIONS_TOTAL, RESERVATION_CONFLICTS_TOTAL};

use super::conflict::{now_ms, validate_bounds};
use super::validate::{Field, validate_customer, validate_reservation, validate_vehicle};
use super::{Engine, EngineError, EntityKind};

fn current_model_year() -> i32 {
    Utc::now().year()
}

fn count_mutation(op: &'static str) {
    metrics::counter!(MUTATIONS_TOTAL, "op" => op).increment(1);
}

impl Engine {
    // ── Customers ────────────────────────────────────────────

    pub async fn create_customer(
        &self,
        id: Ulid,
        name: String,
        email: String,
        phone: String,
    ) -> Result<Customer, EngineError> {
        if self.customers.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut report = validate_customer(&name, &email, &phone);
        if report.ok() {
            // The index entry is the uniqueness commit point under concurrent
            // creates; claim it only for an otherwise-valid record.
            match self.email_index.entry(email.clone()) {
                Entry::Occupied(_) => report.field(Field::Email, "has already been taken"),
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        } else if self.email_index.contains_key(&email) {
            report.field(Field::Email, "has already been taken");
        }
        if !report.ok() {
            return Err(EngineError::Validation(report));
        }

        let event = Event::CustomerCreated {
            id,
            name: name.clone(),
            email: email.clone(),
            phone: phone.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.email_index.remove(&email);
            return Err(e);
        }

        let customer = Customer { id, name, email, phone };
        self.customers
            .insert(id, Arc::new(RwLock::new(customer.clone())));
        self.notify.send(id, &event);
        count_mutation("create_customer");
        Ok(customer)
    }

    pub async fn update_customer(
        &self,
        id: Ulid,
        patch: CustomerPatch,
    ) -> Result<Customer, EngineError> {
        let arc = self
            .get_customer_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Customer, id))?;
        let mut guard = arc.write().await;
        if !self.customers.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Customer, id));
        }

        let merged = Customer {
            id,
            name: patch.name.unwrap_or_else(|| guard.name.clone()),
            email: patch.email.unwrap_or_else(|| guard.email.clone()),
            phone: patch.phone.unwrap_or_else(|| guard.phone.clone()),
        };

        let mut report = validate_customer(&merged.name, &merged.email, &merged.phone);
        let email_changed = merged.email != guard.email;
        let mut claimed = false;
        if email_changed {
            if report.ok() {
                match self.email_index.entry(merged.email.clone()) {
                    Entry::Occupied(_) => report.field(Field::Email, "has already been taken"),
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                        claimed = true;
                    }
                }
            } else if self.email_index.contains_key(&merged.email) {
                report.field(Field::Email, "has already been taken");
            }
        }
        if !report.ok() {
            return Err(EngineError::Validation(report));
        }

        let event = Event::CustomerUpdated {
            id,
            name: merged.name.clone(),
            email: merged.email.clone(),
            phone: merged.phone.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            if claimed {
                self.email_index.remove(&merged.email);
            }
            return Err(e);
        }

        if email_changed {
            self.email_index.remove(&guard.email);
        }
        *guard = merged.clone();
        drop(guard);
        self.notify.send(id, &event);
        count_mutation("update_customer");
        Ok(merged)
    }

    /// Delete a customer and cascade: every vehicle they own (with all of its
    /// reservations, whoever booked them) and every reservation they hold on
    /// other owners' vehicles.
    pub async fn delete_customer(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self
            .get_customer_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Customer, id))?;
        // Held for the whole cascade: concurrent reservation/vehicle creates
        // referencing this customer block on this lock and re-check existence.
        let customer_guard = arc.write().await;
        if !self.customers.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Customer, id));
        }

        // Lock set: owned vehicles plus vehicles carrying this customer's
        // reservations, write-locked in sorted id order to prevent deadlocks.
        // A reservation move takes no customer lock, so the hosting set can
        // shift while we wait on the guards; re-derive it after acquisition
        // and retry until it is stable. Once every hosting vehicle is locked,
        // any further move blocks on one of our guards.
        let guards = loop {
            let vehicle_ids = self.cascade_lock_set(id);
            let mut acquired: Vec<OwnedRwLockWriteGuard<VehicleState>> =
                Vec::with_capacity(vehicle_ids.len());
            for vid in &vehicle_ids {
                if let Some(vs) = self.get_vehicle_arc(vid) {
                    acquired.push(vs.write_owned().await);
                }
            }
            let locked: HashSet<Ulid> = acquired.iter().map(|g| g.vehicle.id).collect();
            if self
                .cascade_lock_set(id)
                .iter()
                .all(|v| locked.contains(v) || !self.vehicles.contains_key(v))
            {
                break acquired;
            }
        };

        let event = Event::CustomerDeleted { id };
        self.wal_append(&event).await?;

        for mut guard in guards {
            let vid = guard.vehicle.id;
            // ownership may have moved while we waited; trust the locked record
            if guard.vehicle.customer_id == id {
                let reservations: Vec<Reservation> = guard.reservations.drain(..).collect();
                for r in reservations {
                    self.unlink_reservation(r.id, r.customer_id);
                }
                self.plate_index.remove(&guard.vehicle.license_plate);
                self.vehicles.remove(&vid);
            } else {
                let removed: Vec<Reservation> = guard
                    .reservations
                    .iter()
                    .filter(|r| r.customer_id == id)
                    .cloned()
                    .collect();
                guard.reservations.retain(|r| r.customer_id != id);
                for r in removed {
                    self.unlink_reservation(r.id, r.customer_id);
                }
            }
        }

        self.vehicles_by_customer.remove(&id);
        self.reservations_by_customer.remove(&id);
        self.email_index.remove(&customer_guard.email);
        self.customers.remove(&id);
        drop(customer_guard);
        self.notify.send(id, &event);
        count_mutation("delete_customer");
        Ok(())
    }

    // ── Vehicles ─────────────────────────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_vehicle(
        &self,
        id: Ulid,
        customer_id: Ulid,
        make: String,
        model: String,
        year: Option<i32>,
        color: String,
        license_plate: String,
    ) -> Result<Vehicle, EngineError> {
        if self.vehicles.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let customer_arc = self
            .get_customer_arc(&customer_id)
            .ok_or(EngineError::NotFound(EntityKind::Customer, customer_id))?;
        let _customer_guard = customer_arc.read().await;
        if !self.customers.contains_key(&customer_id) {
            // lost the race against a cascade delete
            return Err(EngineError::NotFound(EntityKind::Customer, customer_id));
        }

        let mut report = validate_vehicle(
            &make,
            &model,
            year,
            &color,
            &license_plate,
            current_model_year(),
        );
        if report.ok() {
            match self.plate_index.entry(license_plate.clone()) {
                Entry::Occupied(_) => {
                    report.field(Field::LicensePlate, "has already been taken");
                }
                Entry::Vacant(slot) => {
                    slot.insert(id);
                }
            }
        } else if self.plate_index.contains_key(&license_plate) {
            report.field(Field::LicensePlate, "has already been taken");
        }
        if !report.ok() {
            return Err(EngineError::Validation(report));
        }
        let Some(year) = year else {
            return Err(EngineError::Validation(report));
        };

        let event = Event::VehicleCreated {
            id,
            customer_id,
            make: make.clone(),
            model: model.clone(),
            year,
            color: color.clone(),
            license_plate: license_plate.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            self.plate_index.remove(&license_plate);
            return Err(e);
        }

        let vehicle = Vehicle {
            id,
            customer_id,
            make,
            model,
            year,
            color,
            license_plate,
        };
        self.vehicles_by_customer
            .entry(customer_id)
            .or_default()
            .push(id);
        self.vehicles
            .insert(id, Arc::new(RwLock::new(VehicleState::new(vehicle.clone()))));
        self.notify.send(id, &event);
        count_mutation("create_vehicle");
        Ok(vehicle)
    }

    pub async fn update_vehicle(
        &self,
        id: Ulid,
        patch: VehiclePatch,
    ) -> Result<Vehicle, EngineError> {
        // Owner change takes the new customer's read lock first (lock order:
        // customer before vehicle).
        let mut owner_missing = false;
        let _owner_guard = match patch.customer_id {
            Some(cid) => match self.get_customer_arc(&cid) {
                Some(arc) => {
                    let g = arc.read_owned().await;
                    if self.customers.contains_key(&cid) {
                        Some(g)
                    } else {
                        owner_missing = true;
                        None
                    }
                }
                None => {
                    owner_missing = true;
                    None
                }
            },
            None => None,
        };

        let arc = self
            .get_vehicle_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Vehicle, id))?;
        let mut guard = arc.write().await;
        if !self.vehicles.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Vehicle, id));
        }

        let merged = Vehicle {
            id,
            customer_id: patch.customer_id.unwrap_or(guard.vehicle.customer_id),
            make: patch.make.unwrap_or_else(|| guard.vehicle.make.clone()),
            model: patch.model.unwrap_or_else(|| guard.vehicle.model.clone()),
            year: patch.year.unwrap_or(guard.vehicle.year),
            color: patch.color.unwrap_or_else(|| guard.vehicle.color.clone()),
            license_plate: patch
                .license_plate
                .unwrap_or_else(|| guard.vehicle.license_plate.clone()),
        };

        let mut report = validate_vehicle(
            &merged.make,
            &merged.model,
            Some(merged.year),
            &merged.color,
            &merged.license_plate,
            current_model_year(),
        );
        if owner_missing {
            report.field(Field::Customer, "must exist");
        }
        let plate_changed = merged.license_plate != guard.vehicle.license_plate;
        let mut claimed = false;
        if plate_changed {
            if report.ok() {
                match self.plate_index.entry(merged.license_plate.clone()) {
                    Entry::Occupied(_) => {
                        report.field(Field::LicensePlate, "has already been taken");
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(id);
                        claimed = true;
                    }
                }
            } else if self.plate_index.contains_key(&merged.license_plate) {
                report.field(Field::LicensePlate, "has already been taken");
            }
        }
        if !report.ok() {
            return Err(EngineError::Validation(report));
        }

        let event = Event::VehicleUpdated {
            id,
            customer_id: merged.customer_id,
            make: merged.make.clone(),
            model: merged.model.clone(),
            year: merged.year,
            color: merged.color.clone(),
            license_plate: merged.license_plate.clone(),
        };
        if let Err(e) = self.wal_append(&event).await {
            if claimed {
                self.plate_index.remove(&merged.license_plate);
            }
            return Err(e);
        }

        if plate_changed {
            self.plate_index.remove(&guard.vehicle.license_plate);
        }
        if merged.customer_id != guard.vehicle.customer_id {
            self.remove_owned_vehicle(guard.vehicle.customer_id, id);
            self.vehicles_by_customer
                .entry(merged.customer_id)
                .or_default()
                .push(id);
        }
        guard.vehicle = merged.clone();
        drop(guard);
        self.notify.send(id, &event);
        count_mutation("update_vehicle");
        Ok(merged)
    }

    /// Delete a vehicle and cascade its reservations. The owning customer is
    /// untouched.
    pub async fn delete_vehicle(&self, id: Ulid) -> Result<(), EngineError> {
        let arc = self
            .get_vehicle_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Vehicle, id))?;
        let mut guard = arc.write().await;
        if !self.vehicles.contains_key(&id) {
            return Err(EngineError::NotFound(EntityKind::Vehicle, id));
        }

        let event = Event::VehicleDeleted { id };
        self.wal_append(&event).await?;

        let reservations: Vec<Reservation> = guard.reservations.drain(..).collect();
        for r in reservations {
            self.unlink_reservation(r.id, r.customer_id);
        }
        self.plate_index.remove(&guard.vehicle.license_plate);
        self.remove_owned_vehicle(guard.vehicle.customer_id, id);
        self.vehicles.remove(&id);
        drop(guard);
        self.notify.send(id, &event);
        count_mutation("delete_vehicle");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────────

    /// Create a reservation. References are existence-checked up front
    /// (NotFound, never a validation error); the conflict check and insert
    /// run under one write lock on the vehicle's state, so no second
    /// overlapping booking can slip in between them.
    pub async fn create_reservation(
        &self,
        id: Ulid,
        draft: ReservationDraft,
    ) -> Result<Reservation, EngineError> {
        if self.reservation_to_vehicle.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        validate_bounds(draft.start_time, draft.end_time)?;

        let _customer_guard = match draft.customer_id {
            Some(cid) => {
                let arc = self
                    .get_customer_arc(&cid)
                    .ok_or(EngineError::NotFound(EntityKind::Customer, cid))?;
                let g = arc.read_owned().await;
                if !self.customers.contains_key(&cid) {
                    return Err(EngineError::NotFound(EntityKind::Customer, cid));
                }
                Some(g)
            }
            None => None,
        };
        let vehicle_guard = match draft.vehicle_id {
            Some(vid) => {
                let arc = self
                    .get_vehicle_arc(&vid)
                    .ok_or(EngineError::NotFound(EntityKind::Vehicle, vid))?;
                let g = arc.write_owned().await;
                if !self.vehicles.contains_key(&vid) {
                    return Err(EngineError::NotFound(EntityKind::Vehicle, vid));
                }
                if g.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE {
                    return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
                }
                Some(g)
            }
            None => None,
        };

        let report = validate_reservation(&draft, now_ms(), vehicle_guard.as_deref(), None);
        if !report.ok() {
            if report.has_base_errors() {
                metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
            }
            return Err(EngineError::Validation(report));
        }
        let (
            Some(customer_id),
            Some(vehicle_id),
            Some(start),
            Some(end),
            Some(status),
            Some(mut vehicle_guard),
        ) = (
            draft.customer_id,
            draft.vehicle_id,
            draft.start_time,
            draft.end_time,
            draft.status.known(),
            vehicle_guard,
        )
        else {
            // a passing report guarantees presence; kept total for safety
            return Err(EngineError::Validation(report));
        };

        let reservation = Reservation {
            id,
            customer_id,
            vehicle_id,
            span: Span::new(start, end),
            status,
        };
        let event = Event::ReservationCreated {
            id,
            customer_id,
            vehicle_id,
            span: reservation.span,
            status,
        };
        self.wal_append(&event).await?;
        self.link_reservation(&reservation);
        vehicle_guard.insert_reservation(reservation.clone());
        drop(vehicle_guard);
        self.notify.send(vehicle_id, &event);
        count_mutation("create_reservation");
        Ok(reservation)
    }

    /// Merge a patch onto the persisted reservation and re-validate the
    /// result as a whole, excluding the record's own id from the conflict
    /// check. All-or-nothing: on any failure the stored record is untouched.
    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let current_vid = self
            .vehicle_of_reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;

        let mut customer_missing = false;
        let _customer_guard = match patch.customer_id {
            Some(cid) => match self.get_customer_arc(&cid) {
                Some(arc) => {
                    let g = arc.read_owned().await;
                    if self.customers.contains_key(&cid) {
                        Some(g)
                    } else {
                        customer_missing = true;
                        None
                    }
                }
                None => {
                    customer_missing = true;
                    None
                }
            },
            None => None,
        };

        let target_vid = patch.vehicle_id.unwrap_or(current_vid);
        let mut vehicle_missing = false;

        // Write-lock the current vehicle, and the target too when the
        // reservation is moving; two locks are taken in sorted id order.
        let mut current_guard: OwnedRwLockWriteGuard<VehicleState>;
        let mut target_guard: Option<OwnedRwLockWriteGuard<VehicleState>> = None;
        if target_vid == current_vid {
            let arc = self
                .get_vehicle_arc(&current_vid)
                .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
            current_guard = arc.write_owned().await;
        } else {
            let target_arc = self.get_vehicle_arc(&target_vid);
            let current_arc = self
                .get_vehicle_arc(&current_vid)
                .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
            match target_arc {
                Some(t) if target_vid < current_vid => {
                    let tg = t.write_owned().await;
                    current_guard = current_arc.write_owned().await;
                    target_guard = Some(tg);
                }
                Some(t) => {
                    current_guard = current_arc.write_owned().await;
                    target_guard = Some(t.write_owned().await);
                }
                None => {
                    vehicle_missing = true;
                    current_guard = current_arc.write_owned().await;
                }
            }
        }
        if !self.vehicles.contains_key(&current_vid) {
            // the current vehicle was cascade-deleted while we waited, taking
            // this reservation with it
            return Err(EngineError::NotFound(EntityKind::Reservation, id));
        }
        if target_guard.is_some() && !self.vehicles.contains_key(&target_vid) {
            target_guard = None;
            vehicle_missing = true;
        }

        let existing = current_guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;

        if let Some(tg) = &target_guard
            && tg.reservations.len() >= MAX_RESERVATIONS_PER_VEHICLE
        {
            return Err(EngineError::LimitExceeded("too many reservations on vehicle"));
        }

        let draft = ReservationDraft {
            customer_id: Some(patch.customer_id.unwrap_or(existing.customer_id)),
            vehicle_id: Some(target_vid),
            start_time: match patch.start_time {
                Some(TimePatch::Set(ms)) => Some(ms),
                Some(TimePatch::Blank) => None,
                None => Some(existing.span.start),
            },
            end_time: match patch.end_time {
                Some(TimePatch::Set(ms)) => Some(ms),
                Some(TimePatch::Blank) => None,
                None => Some(existing.span.end),
            },
            status: patch
                .status
                .clone()
                .unwrap_or(StatusInput::Known(existing.status)),
        };
        validate_bounds(draft.start_time, draft.end_time)?;

        let conflict_state: Option<&VehicleState> = if vehicle_missing {
            None
        } else {
            match &target_guard {
                Some(tg) => Some(&**tg),
                None => Some(&*current_guard),
            }
        };
        let mut report = validate_reservation(&draft, now_ms(), conflict_state, Some(id));
        if customer_missing {
            report.field(Field::Customer, "must exist");
        }
        if vehicle_missing {
            report.field(Field::Vehicle, "must exist");
        }
        if !report.ok() {
            if report.has_base_errors() {
                metrics::counter!(RESERVATION_CONFLICTS_TOTAL).increment(1);
            }
            return Err(EngineError::Validation(report));
        }
        let (Some(customer_id), Some(start), Some(end), Some(status)) = (
            draft.customer_id,
            draft.start_time,
            draft.end_time,
            draft.status.known(),
        ) else {
            return Err(EngineError::Validation(report));
        };

        let updated = Reservation {
            id,
            customer_id,
            vehicle_id: target_vid,
            span: Span::new(start, end),
            status,
        };
        let event = Event::ReservationUpdated {
            id,
            customer_id,
            vehicle_id: target_vid,
            span: updated.span,
            status,
        };
        self.wal_append(&event).await?;

        current_guard.remove_reservation(id);
        self.unlink_reservation(id, existing.customer_id);
        self.link_reservation(&updated);
        match target_guard {
            Some(mut tg) => {
                tg.insert_reservation(updated.clone());
                drop(tg);
                drop(current_guard);
                self.notify.send(current_vid, &event);
            }
            None => {
                current_guard.insert_reservation(updated.clone());
                drop(current_guard);
            }
        }
        self.notify.send(target_vid, &event);
        count_mutation("update_reservation");
        Ok(updated)
    }

    /// Delete a reservation. Reservations own nothing, so there is no cascade.
    pub async fn delete_reservation(&self, id: Ulid) -> Result<(), EngineError> {
        let vid = self
            .vehicle_of_reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let arc = self
            .get_vehicle_arc(&vid)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let mut guard = arc.write().await;
        if guard.get_reservation(id).is_none() {
            return Err(EngineError::NotFound(EntityKind::Reservation, id));
        }

        let event = Event::ReservationDeleted { id };
        self.wal_append(&event).await?;
        if let Some(removed) = guard.remove_reservation(id) {
            self.unlink_reservation(id, removed.customer_id);
        }
        drop(guard);
        self.notify.send(vid, &event);
        count_mutation("delete_reservation");
        Ok(())
    }

    /// Vehicles a customer cascade must hold: everything they own plus every
    /// vehicle currently hosting one of their reservations, sorted by id.
    fn cascade_lock_set(&self, id: Ulid) -> Vec<Ulid> {
        let mut vehicle_ids = self.owned_vehicles(id);
        let booked: Vec<Ulid> = self
            .reservations_by_customer
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for rid in &booked {
            if let Some(vid) = self.vehicle_of_reservation(rid) {
                vehicle_ids.push(vid);
            }
        }
        vehicle_ids.sort();
        vehicle_ids.dedup();
        vehicle_ids
    }
}
