use async_trait::async_trait;
use chrono::Utc;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Transaction};
use uuid::Uuid;

use cityride_bookings::{Booking, BookingStatus};
use cityride_core::repository::{
    BookingRepository, LifecycleStore, RideRepository, StoreError, StoreResult,
};
use cityride_core::RideQuery;
use cityride_rides::{InventoryError, Ride, RidePatch, RideStatus};

use crate::rows::{self, BookingRow, RideRow};

/// Postgres-backed lifecycle store.
///
/// Compound operations run in one transaction that first takes a row lock
/// on the ride, so everything touching a ride's seats or its bookings is
/// serialized per ride. Booking writes also check the row version.
pub struct PgLifecycleStore {
    pool: PgPool,
}

impl PgLifecycleStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn backend(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

/// `%needle%` with LIKE metacharacters escaped
fn like_pattern(needle: &str) -> String {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    format!("%{}%", escaped)
}

async fn lock_ride(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<Ride> {
    let row: Option<RideRow> = sqlx::query_as("SELECT * FROM rides WHERE id = $1 FOR UPDATE")
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(backend)?;
    row.ok_or(StoreError::RideNotFound(id))?.try_into()
}

async fn lock_active_ride(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<Ride> {
    let ride = lock_ride(tx, id).await?;
    if !ride.is_active() {
        return Err(StoreError::RideNotActive(ride.status));
    }
    Ok(ride)
}

async fn count_bookings(
    tx: &mut Transaction<'_, Postgres>,
    ride_id: Uuid,
    statuses: &[BookingStatus],
) -> StoreResult<usize> {
    let statuses: Vec<&str> = statuses.iter().map(|s| s.as_str()).collect();
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM bookings WHERE ride_id = $1 AND status = ANY($2)",
    )
    .bind(ride_id)
    .bind(statuses)
    .fetch_one(&mut **tx)
    .await
    .map_err(backend)?;
    Ok(count as usize)
}

async fn set_ride_status(
    tx: &mut Transaction<'_, Postgres>,
    id: Uuid,
    status: RideStatus,
) -> StoreResult<Ride> {
    let row: RideRow = sqlx::query_as(
        "UPDATE rides SET status = $2, updated_at = $3 WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(status.as_str())
    .bind(Utc::now())
    .fetch_one(&mut **tx)
    .await
    .map_err(backend)?;
    row.try_into()
}

#[async_trait]
impl RideRepository for PgLifecycleStore {
    async fn insert_ride(&self, ride: &Ride) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO rides (id, driver_id, origin, destination, departure_time, seats_available,
                               booked_seats, price_per_seat, vehicle_type, description, route, status,
                               created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(ride.id)
        .bind(&ride.driver_id)
        .bind(Json(&ride.origin))
        .bind(Json(&ride.destination))
        .bind(ride.departure_time)
        .bind(ride.seats.seats_available)
        .bind(ride.seats.booked_seats)
        .bind(ride.price_per_seat)
        .bind(ride.vehicle_type.as_str())
        .bind(&ride.description)
        .bind(ride.route.as_ref().map(Json))
        .bind(ride.status.as_str())
        .bind(ride.created_at)
        .bind(ride.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_ride(&self, id: Uuid) -> StoreResult<Option<Ride>> {
        let row: Option<RideRow> = sqlx::query_as("SELECT * FROM rides WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Ride::try_from).transpose()
    }

    async fn search_rides(&self, query: &RideQuery) -> StoreResult<Vec<Ride>> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM rides WHERE status = 'active'");

        if let Some(origin) = query.origin.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND origin->>'address' ILIKE ");
            qb.push_bind(like_pattern(origin));
        }
        if let Some(destination) = query.destination.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            qb.push(" AND destination->>'address' ILIKE ");
            qb.push_bind(like_pattern(destination));
        }
        if let Some(date) = query.date {
            qb.push(" AND (departure_time AT TIME ZONE 'UTC')::date = ");
            qb.push_bind(date);
        }
        if let Some(min) = query.min_price {
            qb.push(" AND price_per_seat >= ");
            qb.push_bind(min);
        }
        if let Some(max) = query.max_price {
            qb.push(" AND price_per_seat <= ");
            qb.push_bind(max);
        }
        if let Some(seats) = query.seats_available {
            qb.push(" AND seats_available - booked_seats >= ");
            qb.push_bind(seats);
        }
        if let Some(vehicle_type) = query.vehicle_type {
            qb.push(" AND vehicle_type = ");
            qb.push_bind(vehicle_type.as_str());
        }
        qb.push(" ORDER BY departure_time ASC");

        let rows: Vec<RideRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows::rides(rows)
    }

    async fn list_rides_by_driver(&self, driver_id: &str) -> StoreResult<Vec<Ride>> {
        let rows: Vec<RideRow> =
            sqlx::query_as("SELECT * FROM rides WHERE driver_id = $1 ORDER BY created_at DESC")
                .bind(driver_id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        rows::rides(rows)
    }

    async fn list_rides(&self) -> StoreResult<Vec<Ride>> {
        let rows: Vec<RideRow> = sqlx::query_as("SELECT * FROM rides ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows::rides(rows)
    }

    async fn reserve_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        if count < 1 {
            return Err(StoreError::Ride(InventoryError::InvalidCount(count).into()));
        }

        let row: Option<RideRow> = sqlx::query_as(
            r#"
            UPDATE rides SET booked_seats = booked_seats + $2, updated_at = $3
            WHERE id = $1 AND booked_seats + $2 <= seats_available
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(count)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        match row {
            Some(row) => row.try_into(),
            None => match self.get_ride(id).await? {
                Some(ride) => Err(StoreError::InsufficientSeats { available: ride.available_seats() }),
                None => Err(StoreError::RideNotFound(id)),
            },
        }
    }

    async fn release_seats(&self, id: Uuid, count: i32) -> StoreResult<Ride> {
        let row: Option<RideRow> = sqlx::query_as(
            r#"
            UPDATE rides SET booked_seats = GREATEST(booked_seats - $2, 0), updated_at = $3
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(count.max(0))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.ok_or(StoreError::RideNotFound(id))?.try_into()
    }
}

#[async_trait]
impl BookingRepository for PgLifecycleStore {
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        let row: Option<BookingRow> = sqlx::query_as("SELECT * FROM bookings WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        row.map(Booking::try_from).transpose()
    }

    async fn list_bookings_for_ride(&self, ride_id: Uuid) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> =
            sqlx::query_as("SELECT * FROM bookings WHERE ride_id = $1 ORDER BY created_at DESC")
                .bind(ride_id)
                .fetch_all(&self.pool)
                .await
                .map_err(backend)?;
        rows::bookings(rows)
    }

    async fn list_bookings_for_passenger(&self, passenger_id: &str) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as(
            "SELECT * FROM bookings WHERE passenger_id = $1 ORDER BY created_at DESC",
        )
        .bind(passenger_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows::bookings(rows)
    }

    async fn list_bookings(&self) -> StoreResult<Vec<Booking>> {
        let rows: Vec<BookingRow> = sqlx::query_as("SELECT * FROM bookings ORDER BY created_at DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;
        rows::bookings(rows)
    }
}

#[async_trait]
impl LifecycleStore for PgLifecycleStore {
    async fn create_booking(&self, booking: &Booking) -> StoreResult<(Booking, Ride)> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let ride = lock_active_ride(&mut tx, booking.ride_id).await?;
        let mut booking = booking.clone();
        booking.total_amount = ride.fare_for(booking.seats_booked);
        let available = ride.available_seats();
        if booking.seats_booked > available {
            return Err(StoreError::InsufficientSeats { available });
        }

        let open = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM bookings
                WHERE ride_id = $1 AND passenger_id = $2
                  AND status IN ('registered', 'accepted', 'confirmed')
            )
            "#,
        )
        .bind(booking.ride_id)
        .bind(&booking.passenger_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;
        if open {
            return Err(StoreError::DuplicateBooking);
        }

        let ride: RideRow = sqlx::query_as(
            "UPDATE rides SET booked_seats = booked_seats + $2, updated_at = $3 WHERE id = $1 RETURNING *",
        )
        .bind(booking.ride_id)
        .bind(booking.seats_booked)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, ride_id, passenger_id, seats_booked, total_amount, status,
                                  verification_code, is_verified, verified_at, payment_status,
                                  payment_method, pick_up_location, passenger_details, completed_at,
                                  version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(booking.id)
        .bind(booking.ride_id)
        .bind(&booking.passenger_id)
        .bind(booking.seats_booked)
        .bind(booking.total_amount)
        .bind(booking.status.as_str())
        .bind(booking.verification_code.expose().as_str())
        .bind(booking.is_verified)
        .bind(booking.verified_at)
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_method)
        .bind(booking.pick_up_location.as_ref().map(Json))
        .bind(Json(&booking.passenger_details))
        .bind(booking.completed_at)
        .bind(booking.version)
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|err| {
            if is_unique_violation(&err) {
                StoreError::DuplicateBooking
            } else {
                backend(err)
            }
        })?;

        tx.commit().await.map_err(backend)?;
        Ok((booking, ride.try_into()?))
    }

    async fn save_booking(
        &self,
        booking: &Booking,
        expected_version: i64,
        release_seats: i32,
    ) -> StoreResult<(Booking, Ride)> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let mut ride = lock_ride(&mut tx, booking.ride_id).await?;

        let row: Option<BookingRow> = sqlx::query_as(
            r#"
            UPDATE bookings
            SET status = $3, is_verified = $4, verified_at = $5, payment_status = $6,
                payment_method = $7, completed_at = $8, updated_at = $9, version = version + 1
            WHERE id = $1 AND version = $2
            RETURNING *
            "#,
        )
        .bind(booking.id)
        .bind(expected_version)
        .bind(booking.status.as_str())
        .bind(booking.is_verified)
        .bind(booking.verified_at)
        .bind(booking.payment_status.as_str())
        .bind(&booking.payment_method)
        .bind(booking.completed_at)
        .bind(booking.updated_at)
        .fetch_optional(&mut *tx)
        .await
        .map_err(backend)?;

        let saved: Booking = match row {
            Some(row) => row.try_into()?,
            None => {
                let exists = sqlx::query_scalar::<_, bool>(
                    "SELECT EXISTS (SELECT 1 FROM bookings WHERE id = $1)",
                )
                .bind(booking.id)
                .fetch_one(&mut *tx)
                .await
                .map_err(backend)?;
                return Err(if exists {
                    StoreError::StaleWrite { id: booking.id }
                } else {
                    StoreError::BookingNotFound(booking.id)
                });
            }
        };

        if release_seats > 0 {
            let row: RideRow = sqlx::query_as(
                r#"
                UPDATE rides SET booked_seats = GREATEST(booked_seats - $2, 0), updated_at = $3
                WHERE id = $1
                RETURNING *
                "#,
            )
            .bind(ride.id)
            .bind(release_seats)
            .bind(Utc::now())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend)?;
            ride = row.try_into()?;
        }

        tx.commit().await.map_err(backend)?;
        Ok((saved, ride))
    }

    async fn update_ride(&self, id: Uuid, patch: &RidePatch) -> StoreResult<Ride> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut ride = lock_active_ride(&mut tx, id).await?;
        let confirmed = count_bookings(&mut tx, id, &[BookingStatus::Confirmed]).await?;
        if confirmed > 0 {
            return Err(StoreError::ConfirmedBookings { count: confirmed });
        }
        ride.apply_patch(patch)?;

        // booked_seats is written only by the seat operations.
        let row: RideRow = sqlx::query_as(
            r#"
            UPDATE rides
            SET origin = $2, destination = $3, departure_time = $4, seats_available = $5,
                price_per_seat = $6, vehicle_type = $7, description = $8, route = $9, updated_at = $10
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Json(&ride.origin))
        .bind(Json(&ride.destination))
        .bind(ride.departure_time)
        .bind(ride.seats.seats_available)
        .bind(ride.price_per_seat)
        .bind(ride.vehicle_type.as_str())
        .bind(&ride.description)
        .bind(ride.route.as_ref().map(Json))
        .bind(ride.updated_at)
        .fetch_one(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        row.try_into()
    }

    async fn cancel_ride(&self, id: Uuid) -> StoreResult<(Ride, Vec<Booking>)> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut ride = lock_active_ride(&mut tx, id).await?;
        ride.close(RideStatus::Canceled)?;
        let ride = set_ride_status(&mut tx, id, ride.status).await?;

        let rows: Vec<BookingRow> = sqlx::query_as(
            r#"
            UPDATE bookings SET status = 'canceled', updated_at = $2, version = version + 1
            WHERE ride_id = $1 AND status = 'confirmed'
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(Utc::now())
        .fetch_all(&mut *tx)
        .await
        .map_err(backend)?;

        tx.commit().await.map_err(backend)?;
        Ok((ride, rows::bookings(rows)?))
    }

    async fn complete_ride(&self, id: Uuid) -> StoreResult<Ride> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        let mut ride = lock_active_ride(&mut tx, id).await?;
        let open = count_bookings(
            &mut tx,
            id,
            &[
                BookingStatus::Registered,
                BookingStatus::Accepted,
                BookingStatus::Confirmed,
                BookingStatus::PaymentProcessing,
            ],
        )
        .await?;
        if open > 0 {
            return Err(StoreError::OpenBookings { count: open });
        }
        ride.close(RideStatus::Completed)?;
        let ride = set_ride_status(&mut tx, id, ride.status).await?;

        tx.commit().await.map_err(backend)?;
        Ok(ride)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_pattern_escapes_metacharacters() {
        assert_eq!(like_pattern("Pune"), "%Pune%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }
}
