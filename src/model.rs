use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — the only internal time type. ISO-8601 exists only at
/// the API boundary.
pub type Ms = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Reservation lifecycle status. Only `Pending` and `Confirmed` contend for a
/// vehicle's time; `Cancelled` and `Completed` are inert for both the
/// future-start rule and the conflict rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Pending | Self::Confirmed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "confirmed" => Some(Self::Confirmed),
            "cancelled" => Some(Self::Cancelled),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: Ulid,
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub make: String,
    pub model: String,
    pub year: i32,
    pub color: String,
    pub license_plate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub customer_id: Ulid,
    pub vehicle_id: Ulid,
    pub span: Span,
    pub status: ReservationStatus,
}

/// The `status` slot of a candidate reservation. The boundary layer can hand
/// us a value that is absent, unparseable, or valid — the validator reports
/// each differently.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum StatusInput {
    #[default]
    Blank,
    Unknown(String),
    Known(ReservationStatus),
}

impl StatusInput {
    pub fn known(&self) -> Option<ReservationStatus> {
        match self {
            Self::Known(s) => Some(*s),
            _ => None,
        }
    }
}

/// A patched timestamp slot. Distinguishes a field the caller never sent
/// (keep the stored value) from one that was sent but unreadable, which
/// merges as a hole and fails presence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimePatch {
    Set(Ms),
    Blank,
}

/// A proposed reservation before validation. Every field is optional so the
/// validator can accumulate presence errors instead of short-circuiting.
#[derive(Debug, Clone, Default)]
pub struct ReservationDraft {
    pub customer_id: Option<Ulid>,
    pub vehicle_id: Option<Ulid>,
    pub start_time: Option<Ms>,
    pub end_time: Option<Ms>,
    pub status: StatusInput,
}

/// Partial update for a reservation. `None` means "keep the current value";
/// the patch is merged onto persisted state and the result re-validated as a
/// whole. All-or-nothing: a failed merge persists nothing.
#[derive(Debug, Clone, Default)]
pub struct ReservationPatch {
    pub customer_id: Option<Ulid>,
    pub vehicle_id: Option<Ulid>,
    pub start_time: Option<TimePatch>,
    pub end_time: Option<TimePatch>,
    pub status: Option<StatusInput>,
}

#[derive(Debug, Clone, Default)]
pub struct CustomerPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VehiclePatch {
    pub customer_id: Option<Ulid>,
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<i32>,
    pub color: Option<String>,
    pub license_plate: Option<String>,
}

/// A vehicle plus its reservations, sorted by `span.start`. This is the
/// per-vehicle serialization point: conflict check and insert happen under a
/// single write lock on this state.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    pub reservations: Vec<Reservation>,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            reservations: Vec::new(),
        }
    }

    /// Insert a reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.span.start, |r| r.span.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    /// Remove a reservation by id.
    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    pub fn get_reservation(&self, id: Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span.end > query.start)
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Deletes carry only ids: cascades are re-derived on replay by the same
/// routine the live path uses, so the log never disagrees with the cascade
/// rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    CustomerCreated {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
    },
    CustomerUpdated {
        id: Ulid,
        name: String,
        email: String,
        phone: String,
    },
    CustomerDeleted {
        id: Ulid,
    },
    VehicleCreated {
        id: Ulid,
        customer_id: Ulid,
        make: String,
        model: String,
        year: i32,
        color: String,
        license_plate: String,
    },
    VehicleUpdated {
        id: Ulid,
        customer_id: Ulid,
        make: String,
        model: String,
        year: i32,
        color: String,
        license_plate: String,
    },
    VehicleDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        customer_id: Ulid,
        vehicle_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationUpdated {
        id: Ulid,
        customer_id: Ulid,
        vehicle_id: Ulid,
        span: Span,
        status: ReservationStatus,
    },
    ReservationDeleted {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

/// A reservation with its associated customer and vehicle — the read-only
/// projection returned on successful writes and single-record reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationDetail {
    pub reservation: Reservation,
    pub customer: Customer,
    pub vehicle: Vehicle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerDetail {
    pub customer: Customer,
    pub vehicles: Vec<Vehicle>,
    pub reservations: Vec<Reservation>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VehicleDetail {
    pub vehicle: Vehicle,
    pub customer: Customer,
    pub reservations: Vec<Reservation>,
}
