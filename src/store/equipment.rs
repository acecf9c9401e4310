//! Equipment unit persistence.
//!
//! Identification fields stay in clear (brand, model, serial) because they
//! feed the search index and the serial uniqueness constraint; operational
//! fields stay in clear so range and equality filters work without
//! decryption. Brand/model/serial changes recompute the search index in the
//! same UPDATE statement.

use chrono::Utc;
use sqlx::{query, query_as, FromRow};

use crate::audit::SYSTEM_ACTOR;
use crate::errors::VaultResult;

use super::{map_db_error, Store};

/// Input for adding an equipment unit to the fleet.
#[derive(Debug, Clone)]
pub struct NewEquipment {
    pub brand: String,
    pub model: String,
    pub serial_number: String,
    pub top_speed: i64,
    pub battery_capacity: i64,
    pub state_of_charge: i64,
    pub target_range_min: i64,
    pub target_range_max: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub out_of_service: bool,
    pub mileage: f64,
    pub last_maintenance_date: Option<String>,
}

/// A stored equipment unit.
#[derive(Debug, Clone, FromRow)]
pub struct Equipment {
    pub id: i64,
    pub brand: String,
    pub model: String,
    pub serial_number: String,
    pub top_speed: i64,
    pub battery_capacity: i64,
    pub state_of_charge: i64,
    pub target_range_min: i64,
    pub target_range_max: i64,
    pub latitude: f64,
    pub longitude: f64,
    pub out_of_service: bool,
    pub mileage: f64,
    pub last_maintenance_date: Option<String>,
    pub in_service_date: String,
}

/// Search-result projection.
#[derive(Debug, Clone, FromRow)]
pub struct EquipmentSummary {
    pub id: i64,
    pub brand: String,
    pub model: String,
    pub serial_number: String,
    pub state_of_charge: i64,
    pub out_of_service: bool,
}

/// Typed partial update over the full field set. Administrators use this
/// directly; engineers go through [`OperationalUpdate`].
#[derive(Debug, Clone, Default)]
pub struct EquipmentUpdate {
    pub brand: Option<String>,
    pub model: Option<String>,
    pub serial_number: Option<String>,
    pub top_speed: Option<i64>,
    pub battery_capacity: Option<i64>,
    pub state_of_charge: Option<i64>,
    pub target_range_min: Option<i64>,
    pub target_range_max: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub out_of_service: Option<bool>,
    pub mileage: Option<f64>,
    pub last_maintenance_date: Option<String>,
}

impl EquipmentUpdate {
    pub fn is_empty(&self) -> bool {
        self.brand.is_none()
            && self.model.is_none()
            && self.serial_number.is_none()
            && self.top_speed.is_none()
            && self.battery_capacity.is_none()
            && self.state_of_charge.is_none()
            && self.target_range_min.is_none()
            && self.target_range_max.is_none()
            && self.latitude.is_none()
            && self.longitude.is_none()
            && self.out_of_service.is_none()
            && self.mileage.is_none()
            && self.last_maintenance_date.is_none()
    }
}

/// The subset of fields a service engineer may edit. Identity fields are
/// unrepresentable here, so role-limited callers cannot express them.
#[derive(Debug, Clone, Default)]
pub struct OperationalUpdate {
    pub state_of_charge: Option<i64>,
    pub target_range_min: Option<i64>,
    pub target_range_max: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub out_of_service: Option<bool>,
    pub mileage: Option<f64>,
    pub last_maintenance_date: Option<String>,
}

impl From<OperationalUpdate> for EquipmentUpdate {
    fn from(op: OperationalUpdate) -> Self {
        EquipmentUpdate {
            state_of_charge: op.state_of_charge,
            target_range_min: op.target_range_min,
            target_range_max: op.target_range_max,
            latitude: op.latitude,
            longitude: op.longitude,
            out_of_service: op.out_of_service,
            mileage: op.mileage,
            last_maintenance_date: op.last_maintenance_date,
            ..EquipmentUpdate::default()
        }
    }
}

fn equipment_search_index(brand: &str, model: &str, serial_number: &str) -> String {
    format!("{brand} {model} {serial_number}").to_lowercase()
}

impl Store {
    /// Add a unit. A duplicate serial number surfaces as
    /// [`crate::errors::VaultError::AlreadyExists`], distinct from generic failure.
    pub async fn create_unit(&self, unit: NewEquipment) -> VaultResult<i64> {
        let search_index = equipment_search_index(&unit.brand, &unit.model, &unit.serial_number);
        let in_service_date = Utc::now().to_rfc3339();

        let result = query(
            "INSERT INTO equipment (brand, model, serial_number, top_speed, battery_capacity, \
                                    state_of_charge, target_range_min, target_range_max, \
                                    latitude, longitude, out_of_service, mileage, \
                                    last_maintenance_date, in_service_date, search_index) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&unit.brand)
        .bind(&unit.model)
        .bind(&unit.serial_number)
        .bind(unit.top_speed)
        .bind(unit.battery_capacity)
        .bind(unit.state_of_charge)
        .bind(unit.target_range_min)
        .bind(unit.target_range_max)
        .bind(unit.latitude)
        .bind(unit.longitude)
        .bind(unit.out_of_service)
        .bind(unit.mileage)
        .bind(&unit.last_maintenance_date)
        .bind(&in_service_date)
        .bind(&search_index)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "serial number already exists"))?;

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "New equipment unit added",
                &format!("Serial: {}", unit.serial_number),
                false,
            )
            .await;

        Ok(result.last_insert_rowid())
    }

    /// Fetch a unit by row id. `Ok(None)` when unknown.
    pub async fn get_unit(&self, id: i64) -> VaultResult<Option<Equipment>> {
        query_as::<_, Equipment>(
            "SELECT id, brand, model, serial_number, top_speed, battery_capacity, \
                    state_of_charge, target_range_min, target_range_max, latitude, longitude, \
                    out_of_service, mileage, last_maintenance_date, in_service_date \
             FROM equipment WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_error(e, "equipment"))
    }

    /// Substring search over the brand/model/serial index.
    pub async fn search_units(&self, term: &str) -> VaultResult<Vec<EquipmentSummary>> {
        let pattern = format!("%{}%", term.to_lowercase());
        query_as::<_, EquipmentSummary>(
            "SELECT id, brand, model, serial_number, state_of_charge, out_of_service \
             FROM equipment WHERE search_index LIKE ? ORDER BY brand, model",
        )
        .bind(pattern)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_error(e, "equipment"))
    }

    /// Apply a partial update. Brand/model/serial changes recompute the
    /// search index within the same UPDATE. Empty update or unknown id
    /// returns `Ok(false)`.
    pub async fn update_unit(&self, id: i64, update: EquipmentUpdate) -> VaultResult<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let Some(current) = self.get_unit(id).await? else {
            return Ok(false);
        };

        let brand = update.brand.unwrap_or(current.brand);
        let model = update.model.unwrap_or(current.model);
        let serial_number = update.serial_number.unwrap_or(current.serial_number);
        let top_speed = update.top_speed.unwrap_or(current.top_speed);
        let battery_capacity = update.battery_capacity.unwrap_or(current.battery_capacity);
        let state_of_charge = update.state_of_charge.unwrap_or(current.state_of_charge);
        let target_range_min = update.target_range_min.unwrap_or(current.target_range_min);
        let target_range_max = update.target_range_max.unwrap_or(current.target_range_max);
        let latitude = update.latitude.unwrap_or(current.latitude);
        let longitude = update.longitude.unwrap_or(current.longitude);
        let out_of_service = update.out_of_service.unwrap_or(current.out_of_service);
        let mileage = update.mileage.unwrap_or(current.mileage);
        let last_maintenance_date = update
            .last_maintenance_date
            .or(current.last_maintenance_date);

        let search_index = equipment_search_index(&brand, &model, &serial_number);

        let result = query(
            "UPDATE equipment SET brand = ?, model = ?, serial_number = ?, top_speed = ?, \
                                  battery_capacity = ?, state_of_charge = ?, \
                                  target_range_min = ?, target_range_max = ?, latitude = ?, \
                                  longitude = ?, out_of_service = ?, mileage = ?, \
                                  last_maintenance_date = ?, search_index = ? \
             WHERE id = ?",
        )
        .bind(&brand)
        .bind(&model)
        .bind(&serial_number)
        .bind(top_speed)
        .bind(battery_capacity)
        .bind(state_of_charge)
        .bind(target_range_min)
        .bind(target_range_max)
        .bind(latitude)
        .bind(longitude)
        .bind(out_of_service)
        .bind(mileage)
        .bind(&last_maintenance_date)
        .bind(&search_index)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "serial number already exists"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "Equipment data updated",
                &format!("Serial: {serial_number}"),
                false,
            )
            .await;
        Ok(true)
    }

    /// Hard-delete a unit. `Ok(false)` when the id is unknown.
    pub async fn delete_unit(&self, id: i64) -> VaultResult<bool> {
        let result = query("DELETE FROM equipment WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_error(e, "equipment"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "Equipment unit deleted",
                &format!("Equipment row id: {id}"),
                false,
            )
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_index_shape() {
        assert_eq!(
            equipment_search_index("Segway", "Ninebot MAX", "SN-001-A"),
            "segway ninebot max sn-001-a"
        );
    }

    #[test]
    fn operational_update_cannot_express_identity_fields() {
        let op = OperationalUpdate {
            state_of_charge: Some(80),
            mileage: Some(1204.5),
            ..OperationalUpdate::default()
        };
        let update: EquipmentUpdate = op.into();
        assert!(update.brand.is_none());
        assert!(update.model.is_none());
        assert!(update.serial_number.is_none());
        assert_eq!(update.state_of_charge, Some(80));
        assert_eq!(update.mileage, Some(1204.5));
    }
}
