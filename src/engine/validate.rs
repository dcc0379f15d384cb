use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::has_conflict;

/// The validatable fields across all three record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Name,
    Email,
    Phone,
    Make,
    Model,
    Year,
    Color,
    LicensePlate,
    Customer,
    Vehicle,
    StartTime,
    EndTime,
    Status,
}

impl Field {
    pub fn label(self) -> &'static str {
        match self {
            Self::Name => "Name",
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Make => "Make",
            Self::Model => "Model",
            Self::Year => "Year",
            Self::Color => "Color",
            Self::LicensePlate => "License plate",
            Self::Customer => "Customer",
            Self::Vehicle => "Vehicle",
            Self::StartTime => "Start time",
            Self::EndTime => "End time",
            Self::Status => "Status",
        }
    }
}

/// Accumulated validation outcome. Field errors are scoped to one attribute;
/// base errors concern the record as a whole (the overlap rule). Rules never
/// short-circuit: a candidate with three problems reports all three.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub field_errors: Vec<(Field, String)>,
    pub base_errors: Vec<String>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.field_errors.is_empty() && self.base_errors.is_empty()
    }

    pub fn field(&mut self, field: Field, message: impl Into<String>) {
        self.field_errors.push((field, message.into()));
    }

    pub fn base(&mut self, message: impl Into<String>) {
        self.base_errors.push(message.into());
    }

    pub fn has_field_error(&self, field: Field) -> bool {
        self.field_errors.iter().any(|(f, _)| *f == field)
    }

    pub fn has_base_errors(&self) -> bool {
        !self.base_errors.is_empty()
    }

    /// Flatten to renderable strings: field errors as "Start time must be in
    /// the future", base errors verbatim.
    pub fn full_messages(&self) -> Vec<String> {
        let mut messages: Vec<String> = self
            .field_errors
            .iter()
            .map(|(f, m)| format!("{} {}", f.label(), m))
            .collect();
        messages.extend(self.base_errors.iter().cloned());
        messages
    }
}

/// Validate a candidate reservation against the full rule set.
///
/// `vehicle` is the locked state of the vehicle the candidate references, or
/// `None` when the reference is absent; `exclude` is the candidate's own id
/// in the update case so it never conflicts with itself. All rules run and
/// errors accumulate.
pub fn validate_reservation(
    draft: &ReservationDraft,
    now: Ms,
    vehicle: Option<&VehicleState>,
    exclude: Option<Ulid>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    if draft.customer_id.is_none() {
        report.field(Field::Customer, "must exist");
    }
    if draft.vehicle_id.is_none() {
        report.field(Field::Vehicle, "must exist");
    }
    if draft.start_time.is_none() {
        report.field(Field::StartTime, "can't be blank");
    }
    if draft.end_time.is_none() {
        report.field(Field::EndTime, "can't be blank");
    }
    match &draft.status {
        StatusInput::Blank => report.field(Field::Status, "can't be blank"),
        StatusInput::Unknown(_) => report.field(Field::Status, "is not included in the list"),
        StatusInput::Known(_) => {}
    }

    if let (Some(start), Some(end)) = (draft.start_time, draft.end_time)
        && end <= start
    {
        report.field(Field::EndTime, "must be after start time");
    }

    if let Some(start) = draft.start_time {
        // Cancelled and completed reservations are historical records; only
        // active (or still-undetermined) statuses must start in the future.
        let exempt = matches!(draft.status.known(), Some(s) if !s.is_active());
        if !exempt && start < now {
            report.field(Field::StartTime, "must be in the future");
        }
    }

    if let (Some(start), Some(end), Some(vs)) = (draft.start_time, draft.end_time, vehicle)
        && has_conflict(vs, start, end, exclude)
    {
        report.base("Time slot overlaps with an existing reservation");
    }

    report
}

pub fn validate_customer(name: &str, email: &str, phone: &str) -> ValidationReport {
    let mut report = ValidationReport::default();

    if name.is_empty() {
        report.field(Field::Name, "can't be blank");
    }
    let name_len = name.chars().count();
    if name_len < NAME_MIN_LEN {
        report.field(
            Field::Name,
            format!("is too short (minimum is {NAME_MIN_LEN} characters)"),
        );
    } else if name_len > NAME_MAX_LEN {
        report.field(
            Field::Name,
            format!("is too long (maximum is {NAME_MAX_LEN} characters)"),
        );
    }

    if email.is_empty() {
        report.field(Field::Email, "can't be blank");
    } else if !valid_email(email) {
        report.field(Field::Email, "is invalid");
    }

    if phone.is_empty() {
        report.field(Field::Phone, "can't be blank");
    } else if !valid_phone(phone) {
        report.field(Field::Phone, "must be a valid phone number");
    }

    report
}

/// `year` is `None` when the boundary layer could not read a number at all.
pub fn validate_vehicle(
    make: &str,
    model: &str,
    year: Option<i32>,
    color: &str,
    license_plate: &str,
    current_year: i32,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    check_required_text(&mut report, Field::Make, make, MAKE_MAX_LEN);
    check_required_text(&mut report, Field::Model, model, MODEL_MAX_LEN);

    match year {
        // a missing or unreadable year fails both presence and numericality
        None => {
            report.field(Field::Year, "can't be blank");
            report.field(Field::Year, "is not a number");
        }
        Some(y) if y <= MIN_VEHICLE_YEAR => {
            report.field(
                Field::Year,
                format!("must be greater than {MIN_VEHICLE_YEAR}"),
            );
        }
        Some(y) if y > current_year + 1 => {
            report.field(
                Field::Year,
                format!("must be less than or equal to {}", current_year + 1),
            );
        }
        Some(_) => {}
    }

    check_required_text(&mut report, Field::Color, color, COLOR_MAX_LEN);
    check_required_text(&mut report, Field::LicensePlate, license_plate, PLATE_MAX_LEN);

    report
}

fn check_required_text(report: &mut ValidationReport, field: Field, value: &str, max: usize) {
    if value.is_empty() {
        report.field(field, "can't be blank");
    } else if value.chars().count() > max {
        report.field(field, format!("is too long (maximum is {max} characters)"));
    }
}

/// Structural check modeled on the mailto address shape: a non-empty local
/// part from the addr-spec character set, then dot-separated domain labels.
/// A single-label domain (`user@localhost`) is acceptable.
fn valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    if local.is_empty() || !local.chars().all(local_part_char) {
        return false;
    }
    !domain.is_empty() && domain.split('.').all(domain_label)
}

fn local_part_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || ".!#$%&'*+/=?^_`{|}~-".contains(c)
}

/// Alphanumeric edges, hyphens inside, at most 63 characters.
fn domain_label(label: &str) -> bool {
    label.len() <= 63
        && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        && label.chars().next().is_some_and(|c| c.is_ascii_alphanumeric())
        && label.chars().last().is_some_and(|c| c.is_ascii_alphanumeric())
}

/// Digits, whitespace, hyphens and parentheses only.
fn valid_phone(phone: &str) -> bool {
    phone
        .chars()
        .all(|c| c.is_ascii_digit() || c.is_whitespace() || matches!(c, '-' | '(' | ')'))
}
