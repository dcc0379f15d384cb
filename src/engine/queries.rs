use ulid::Ulid;

use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError, EntityKind};

/// Filters for reservation listings. All criteria are conjunctive.
#[derive(Debug, Clone, Default)]
pub struct ReservationFilter {
    pub customer_id: Option<Ulid>,
    pub vehicle_id: Option<Ulid>,
    /// Only active reservations whose start lies strictly in the future.
    pub upcoming_only: bool,
    /// Only reservations fully contained in this window.
    pub date_range: Option<Span>,
}

impl Engine {
    /// List reservations matching the filter, each joined with its customer
    /// and vehicle. Ulids carry their creation time, so sorting by id merges
    /// the per-vehicle shards into one stable, near-chronological order.
    pub async fn list_reservations(&self, filter: &ReservationFilter) -> Vec<ReservationDetail> {
        let now = now_ms();
        let mut rows: Vec<(Reservation, Vehicle)> = Vec::new();

        let vehicle_ids: Vec<Ulid> = match filter.vehicle_id {
            Some(vid) => vec![vid],
            None => self.vehicles.iter().map(|e| *e.key()).collect(),
        };
        for vid in vehicle_ids {
            let Some(vs) = self.get_vehicle_arc(&vid) else {
                continue;
            };
            let guard = vs.read().await;
            for r in &guard.reservations {
                if let Some(cid) = filter.customer_id
                    && r.customer_id != cid
                {
                    continue;
                }
                if filter.upcoming_only && !(r.span.start > now && r.status.is_active()) {
                    continue;
                }
                if let Some(range) = &filter.date_range
                    && !(r.span.start >= range.start && r.span.end <= range.end)
                {
                    continue;
                }
                rows.push((r.clone(), guard.vehicle.clone()));
            }
        }

        let mut details = Vec::with_capacity(rows.len());
        for (reservation, vehicle) in rows {
            // the customer can only be missing mid-cascade; drop the row
            let Ok(customer) = self.get_customer(reservation.customer_id).await else {
                continue;
            };
            details.push(ReservationDetail {
                reservation,
                customer,
                vehicle,
            });
        }
        details.sort_by_key(|d| d.reservation.id);
        details
    }

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let vid = self
            .vehicle_of_reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let vs = self
            .get_vehicle_arc(&vid)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let guard = vs.read().await;
        guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))
    }

    pub async fn get_reservation_detail(
        &self,
        id: Ulid,
    ) -> Result<ReservationDetail, EngineError> {
        let vid = self
            .vehicle_of_reservation(&id)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let vs = self
            .get_vehicle_arc(&vid)
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let guard = vs.read().await;
        let reservation = guard
            .get_reservation(id)
            .cloned()
            .ok_or(EngineError::NotFound(EntityKind::Reservation, id))?;
        let vehicle = guard.vehicle.clone();
        drop(guard);
        let customer = self.get_customer(reservation.customer_id).await?;
        Ok(ReservationDetail {
            reservation,
            customer,
            vehicle,
        })
    }

    pub async fn list_customers(&self) -> Vec<Customer> {
        let arcs: Vec<_> = self.customers.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for arc in arcs {
            out.push(arc.read().await.clone());
        }
        out.sort_by_key(|c| c.id);
        out
    }

    pub async fn get_customer(&self, id: Ulid) -> Result<Customer, EngineError> {
        let arc = self
            .get_customer_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Customer, id))?;
        let guard = arc.read().await;
        Ok(guard.clone())
    }

    /// A customer joined with their owned vehicles and all reservations they
    /// hold, on any vehicle.
    pub async fn get_customer_detail(&self, id: Ulid) -> Result<CustomerDetail, EngineError> {
        let customer = self.get_customer(id).await?;

        let mut vehicles = Vec::new();
        for vid in self.owned_vehicles(id) {
            if let Some(vs) = self.get_vehicle_arc(&vid) {
                vehicles.push(vs.read().await.vehicle.clone());
            }
        }
        vehicles.sort_by_key(|v| v.id);

        let mut reservations = Vec::new();
        let rids: Vec<Ulid> = self
            .reservations_by_customer
            .get(&id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        for rid in rids {
            let Some(vid) = self.vehicle_of_reservation(&rid) else {
                continue;
            };
            let Some(vs) = self.get_vehicle_arc(&vid) else {
                continue;
            };
            let guard = vs.read().await;
            if let Some(r) = guard.get_reservation(rid) {
                reservations.push(r.clone());
            }
        }
        reservations.sort_by_key(|r| r.id);

        Ok(CustomerDetail {
            customer,
            vehicles,
            reservations,
        })
    }

    pub async fn list_vehicles(&self, customer_id: Option<Ulid>) -> Vec<Vehicle> {
        let ids: Vec<Ulid> = match customer_id {
            Some(cid) => self.owned_vehicles(cid),
            None => self.vehicles.iter().map(|e| *e.key()).collect(),
        };
        let mut out = Vec::with_capacity(ids.len());
        for vid in ids {
            if let Some(vs) = self.get_vehicle_arc(&vid) {
                out.push(vs.read().await.vehicle.clone());
            }
        }
        out.sort_by_key(|v| v.id);
        out
    }

    pub async fn get_vehicle(&self, id: Ulid) -> Result<Vehicle, EngineError> {
        let vs = self
            .get_vehicle_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Vehicle, id))?;
        let guard = vs.read().await;
        Ok(guard.vehicle.clone())
    }

    /// A vehicle joined with its owner and schedule.
    pub async fn get_vehicle_detail(&self, id: Ulid) -> Result<VehicleDetail, EngineError> {
        let vs = self
            .get_vehicle_arc(&id)
            .ok_or(EngineError::NotFound(EntityKind::Vehicle, id))?;
        let guard = vs.read().await;
        let vehicle = guard.vehicle.clone();
        let mut reservations = guard.reservations.clone();
        drop(guard);
        reservations.sort_by_key(|r| r.id);
        let customer = self.get_customer(vehicle.customer_id).await?;
        Ok(VehicleDetail {
            vehicle,
            customer,
            reservations,
        })
    }
}
