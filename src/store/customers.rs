//! Customer record persistence.
//!
//! Every personal field is encrypted at rest. A plaintext search index
//! (lower-cased `first last email customer_id`) is maintained alongside the
//! ciphertext so substring search never has to decrypt the table. Any update
//! touching an index-relevant field recomputes the index in the same UPDATE
//! statement; a stale index is a correctness bug.

use chrono::Utc;
use rand::Rng;
use sqlx::{query, query_as};

use crate::audit::SYSTEM_ACTOR;
use crate::errors::VaultResult;

use super::{map_db_error, Store};

/// Input for registering a customer. The console layer has already run the
/// whitelist validators; the store only enforces structural invariants.
#[derive(Debug, Clone)]
pub struct NewCustomer {
    pub first_name: String,
    pub last_name: String,
    pub birthday: String,
    pub gender: String,
    pub street_name: String,
    pub house_number: String,
    pub zip_code: String,
    pub city: String,
    pub email: String,
    pub mobile_phone: String,
    pub driving_license: String,
}

/// A fully decrypted customer record.
#[derive(Debug, Clone)]
pub struct Customer {
    pub id: i64,
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub birthday: String,
    pub gender: String,
    pub street_name: String,
    pub house_number: String,
    pub zip_code: String,
    pub city: String,
    pub email: String,
    pub mobile_phone: String,
    pub driving_license: String,
    pub registration_date: String,
}

/// Search-result projection: only the fields the console lists.
#[derive(Debug, Clone)]
pub struct CustomerSummary {
    pub id: i64,
    pub customer_id: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
}

/// Typed partial update for a customer record.
#[derive(Debug, Clone, Default)]
pub struct CustomerUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub birthday: Option<String>,
    pub gender: Option<String>,
    pub street_name: Option<String>,
    pub house_number: Option<String>,
    pub zip_code: Option<String>,
    pub city: Option<String>,
    pub email: Option<String>,
    pub mobile_phone: Option<String>,
    pub driving_license: Option<String>,
}

impl CustomerUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.birthday.is_none()
            && self.gender.is_none()
            && self.street_name.is_none()
            && self.house_number.is_none()
            && self.zip_code.is_none()
            && self.city.is_none()
            && self.email.is_none()
            && self.mobile_phone.is_none()
            && self.driving_license.is_none()
    }
}

fn customer_search_index(first_name: &str, last_name: &str, email: &str, customer_id: &str) -> String {
    format!("{first_name} {last_name} {email} {customer_id}").to_lowercase()
}

fn generate_customer_id() -> String {
    rand::rng()
        .random_range(1_000_000_000i64..=9_999_999_999i64)
        .to_string()
}

impl Store {
    /// Register a customer, returning the generated 10-digit customer id.
    pub async fn create_customer(&self, customer: NewCustomer) -> VaultResult<String> {
        let cipher = self.cipher();

        // Retried on the vanishingly unlikely id collision.
        let mut customer_id = generate_customer_id();
        for _ in 0..5 {
            let exists: Option<i64> =
                sqlx::query_scalar("SELECT id FROM customers WHERE customer_id = ?")
                    .bind(&customer_id)
                    .fetch_optional(self.pool())
                    .await
                    .map_err(|e| map_db_error(e, "customer id"))?;
            if exists.is_none() {
                break;
            }
            customer_id = generate_customer_id();
        }

        let search_index = customer_search_index(
            &customer.first_name,
            &customer.last_name,
            &customer.email,
            &customer_id,
        );
        let registration_date = Utc::now().to_rfc3339();

        query(
            "INSERT INTO customers (customer_id, first_name, last_name, birthday, gender, \
                                    street_name, house_number, zip_code, city, email, \
                                    mobile_phone, driving_license, registration_date, \
                                    search_index) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&customer_id)
        .bind(cipher.encrypt(&customer.first_name)?)
        .bind(cipher.encrypt(&customer.last_name)?)
        .bind(cipher.encrypt(&customer.birthday)?)
        .bind(cipher.encrypt(&customer.gender)?)
        .bind(cipher.encrypt(&customer.street_name)?)
        .bind(cipher.encrypt(&customer.house_number)?)
        .bind(cipher.encrypt(&customer.zip_code)?)
        .bind(cipher.encrypt(&customer.city)?)
        .bind(cipher.encrypt(&customer.email)?)
        .bind(cipher.encrypt(&customer.mobile_phone)?)
        .bind(cipher.encrypt(&customer.driving_license)?)
        .bind(cipher.encrypt(&registration_date)?)
        .bind(&search_index)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "customer id already exists"))?;

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "New customer registered",
                &format!("Customer ID: {customer_id}"),
                false,
            )
            .await;

        Ok(customer_id)
    }

    /// Fetch a customer by row id. `Ok(None)` when unknown.
    pub async fn get_customer(&self, id: i64) -> VaultResult<Option<Customer>> {
        let row: Option<CustomerRow> = query_as(
            "SELECT id, customer_id, first_name, last_name, birthday, gender, street_name, \
                    house_number, zip_code, city, email, mobile_phone, driving_license, \
                    registration_date \
             FROM customers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| map_db_error(e, "customer"))?;

        Ok(row.map(|r| self.decrypt_customer(r)))
    }

    /// Substring search over the plaintext search index. Never matches on
    /// ciphertext.
    pub async fn search_customers(&self, term: &str) -> VaultResult<Vec<CustomerSummary>> {
        let pattern = format!("%{}%", term.to_lowercase());
        let rows: Vec<(i64, String, String, String, String)> = query_as(
            "SELECT id, customer_id, first_name, last_name, email \
             FROM customers WHERE search_index LIKE ? ORDER BY customer_id",
        )
        .bind(pattern)
        .fetch_all(self.pool())
        .await
        .map_err(|e| map_db_error(e, "customers"))?;

        let cipher = self.cipher();
        Ok(rows
            .into_iter()
            .map(|(id, customer_id, first_name, last_name, email)| CustomerSummary {
                id,
                customer_id,
                first_name: cipher.decrypt_lossy(&first_name),
                last_name: cipher.decrypt_lossy(&last_name),
                email: cipher.decrypt_lossy(&email),
            })
            .collect())
    }

    /// Apply a partial update. Changes to first name, last name or email
    /// recompute the search index within the same UPDATE. An empty update or
    /// unknown id returns `Ok(false)`.
    pub async fn update_customer(&self, id: i64, update: CustomerUpdate) -> VaultResult<bool> {
        if update.is_empty() {
            return Ok(false);
        }
        let Some(current) = self.get_customer(id).await? else {
            return Ok(false);
        };

        let first_name = update.first_name.unwrap_or(current.first_name);
        let last_name = update.last_name.unwrap_or(current.last_name);
        let birthday = update.birthday.unwrap_or(current.birthday);
        let gender = update.gender.unwrap_or(current.gender);
        let street_name = update.street_name.unwrap_or(current.street_name);
        let house_number = update.house_number.unwrap_or(current.house_number);
        let zip_code = update.zip_code.unwrap_or(current.zip_code);
        let city = update.city.unwrap_or(current.city);
        let email = update.email.unwrap_or(current.email);
        let mobile_phone = update.mobile_phone.unwrap_or(current.mobile_phone);
        let driving_license = update.driving_license.unwrap_or(current.driving_license);

        let search_index =
            customer_search_index(&first_name, &last_name, &email, &current.customer_id);

        let cipher = self.cipher();
        let result = query(
            "UPDATE customers SET first_name = ?, last_name = ?, birthday = ?, gender = ?, \
                                  street_name = ?, house_number = ?, zip_code = ?, city = ?, \
                                  email = ?, mobile_phone = ?, driving_license = ?, \
                                  search_index = ? \
             WHERE id = ?",
        )
        .bind(cipher.encrypt(&first_name)?)
        .bind(cipher.encrypt(&last_name)?)
        .bind(cipher.encrypt(&birthday)?)
        .bind(cipher.encrypt(&gender)?)
        .bind(cipher.encrypt(&street_name)?)
        .bind(cipher.encrypt(&house_number)?)
        .bind(cipher.encrypt(&zip_code)?)
        .bind(cipher.encrypt(&city)?)
        .bind(cipher.encrypt(&email)?)
        .bind(cipher.encrypt(&mobile_phone)?)
        .bind(cipher.encrypt(&driving_license)?)
        .bind(&search_index)
        .bind(id)
        .execute(self.pool())
        .await
        .map_err(|e| map_db_error(e, "customer"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "Customer data updated",
                &format!("Customer ID: {}", current.customer_id),
                false,
            )
            .await;
        Ok(true)
    }

    /// Hard-delete a customer. `Ok(false)` when the id is unknown.
    pub async fn delete_customer(&self, id: i64) -> VaultResult<bool> {
        let result = query("DELETE FROM customers WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(|e| map_db_error(e, "customer"))?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        self.audit()
            .record(
                SYSTEM_ACTOR,
                "Customer deleted",
                &format!("Customer row id: {id}"),
                false,
            )
            .await;
        Ok(true)
    }

    fn decrypt_customer(&self, r: CustomerRow) -> Customer {
        let cipher = self.cipher();
        Customer {
            id: r.0,
            customer_id: r.1,
            first_name: cipher.decrypt_lossy(&r.2),
            last_name: cipher.decrypt_lossy(&r.3),
            birthday: cipher.decrypt_lossy(&r.4),
            gender: cipher.decrypt_lossy(&r.5),
            street_name: cipher.decrypt_lossy(&r.6),
            house_number: cipher.decrypt_lossy(&r.7),
            zip_code: cipher.decrypt_lossy(&r.8),
            city: cipher.decrypt_lossy(&r.9),
            email: cipher.decrypt_lossy(&r.10),
            mobile_phone: cipher.decrypt_lossy(&r.11),
            driving_license: cipher.decrypt_lossy(&r.12),
            registration_date: cipher.decrypt_lossy(&r.13),
        }
    }
}

type CustomerRow = (
    i64,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn search_index_is_lowercased_concatenation() {
        let idx = customer_search_index("Jan", "De Vries", "Jan@Example.COM", "1234567890");
        assert_eq!(idx, "jan de vries jan@example.com 1234567890");
    }

    #[test]
    fn customer_ids_are_ten_digits() {
        for _ in 0..50 {
            let id = generate_customer_id();
            assert_eq!(id.len(), 10);
            assert!(id.bytes().all(|b| b.is_ascii_digit()));
            assert_ne!(id.as_bytes()[0], b'0');
        }
    }
}
