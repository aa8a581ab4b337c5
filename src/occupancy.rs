// src/occupancy.rs
//! Effective room status: derived from the stored status and the bookings
//! holding the room right now. Never persisted.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::ApiResult;
use crate::models::{ActiveBookingSummary, BookingStatus, Room, RoomStatus, RoomWithStatus};

/// SQL form of [`is_active_booking`] for a `bookings b` alias.
/// Binds: `now`, `now`.
pub const ACTIVE_BOOKING_PREDICATE: &str = "b.status IN ('CONFIRMED', 'CHECKED_IN') \
     AND b.check_in <= ? \
     AND (b.check_out > ? OR b.status = 'CHECKED_IN')";

/// A booking is active when the guest is, or should be, in the room at `now`.
/// A checked-in guest past the planned check-out is still in house until checked out.
pub fn is_active_booking(
    status: BookingStatus,
    check_in: DateTime<Utc>,
    check_out: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    match status {
        BookingStatus::Confirmed => check_in <= now && check_out > now,
        BookingStatus::CheckedIn => check_in <= now,
        _ => false,
    }
}

pub fn effective_status(stored: RoomStatus, has_active_booking: bool) -> RoomStatus {
    if has_active_booking {
        RoomStatus::Occupied
    } else {
        stored
    }
}

#[derive(Debug, Serialize, Clone, Default, PartialEq)]
pub struct StatusCounts {
    pub total: i64,
    pub available: i64,
    pub occupied: i64,
    pub cleaning: i64,
    pub maintenance: i64,
    pub blocked: i64,
    /// Occupied rooms over all rooms, in percent.
    pub occupancy_rate: f64,
}

impl StatusCounts {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = RoomStatus>,
    {
        let mut counts = StatusCounts::default();
        for status in statuses {
            counts.total += 1;
            match status {
                RoomStatus::Available => counts.available += 1,
                RoomStatus::Occupied => counts.occupied += 1,
                RoomStatus::Cleaning => counts.cleaning += 1,
                RoomStatus::Maintenance => counts.maintenance += 1,
                RoomStatus::Blocked => counts.blocked += 1,
            }
        }
        counts.occupancy_rate = occupancy_rate(counts.occupied, counts.total);
        counts
    }
}

pub fn occupancy_rate(occupied: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    ((occupied as f64 / total as f64) * 10_000.0).round() / 100.0
}

/// Pairs every room with its effective status and the booking holding it.
pub fn resolve_rooms(
    rooms: Vec<Room>,
    active: Vec<ActiveBookingSummary>,
    now: DateTime<Utc>,
) -> Vec<RoomWithStatus> {
    let mut by_room: HashMap<String, ActiveBookingSummary> = HashMap::new();
    for booking in active {
        let Some(status) = BookingStatus::parse(&booking.status) else {
            continue;
        };
        if !is_active_booking(status, booking.check_in, booking.check_out, now) {
            continue;
        }
        // Keep the earliest arrival when stays overlap
        match by_room.get(&booking.room_id) {
            Some(existing) if existing.check_in <= booking.check_in => {}
            _ => {
                by_room.insert(booking.room_id.clone(), booking);
            }
        }
    }

    rooms
        .into_iter()
        .map(|room| {
            let active_booking = by_room.remove(&room.id);
            let effective_status = effective_status(room.stored_status(), active_booking.is_some());
            RoomWithStatus {
                room,
                effective_status,
                active_booking,
            }
        })
        .collect()
}

pub async fn load_active_bookings(
    pool: &SqlitePool,
    now: DateTime<Utc>,
) -> ApiResult<Vec<ActiveBookingSummary>> {
    let sql = format!(
        r#"
        SELECT b.id, b.room_id, b.guest_id, g.name AS guest_name, b.status, b.check_in, b.check_out
        FROM bookings b
        JOIN guests g ON g.id = b.guest_id
        WHERE {}
        ORDER BY b.check_in ASC
        "#,
        ACTIVE_BOOKING_PREDICATE
    );

    let bookings = sqlx::query_as::<_, ActiveBookingSummary>(&sql)
        .bind(now)
        .bind(now)
        .fetch_all(pool)
        .await?;

    Ok(bookings)
}

pub async fn rooms_with_status(pool: &SqlitePool, now: DateTime<Utc>) -> ApiResult<Vec<RoomWithStatus>> {
    let rooms: Vec<Room> = sqlx::query_as("SELECT * FROM rooms ORDER BY number ASC")
        .fetch_all(pool)
        .await?;
    let active = load_active_bookings(pool, now).await?;

    Ok(resolve_rooms(rooms, active, now))
}

pub async fn status_counts(pool: &SqlitePool, now: DateTime<Utc>) -> ApiResult<StatusCounts> {
    let rooms = rooms_with_status(pool, now).await?;
    Ok(StatusCounts::from_statuses(rooms.iter().map(|r| r.effective_status)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn room(id: &str, status: RoomStatus) -> Room {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        Room {
            id: id.to_string(),
            number: id.to_string(),
            name: format!("Quarto {}", id),
            category: "STANDARD".to_string(),
            capacity: 2,
            daily_rate: 250.0,
            floor: None,
            description: None,
            amenities: None,
            status: status.as_str().to_string(),
            created_by: None,
            updated_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn booking(room_id: &str, status: BookingStatus, check_in: DateTime<Utc>, check_out: DateTime<Utc>) -> ActiveBookingSummary {
        ActiveBookingSummary {
            id: format!("b-{}", room_id),
            room_id: room_id.to_string(),
            guest_id: "g1".to_string(),
            guest_name: "Ana".to_string(),
            status: status.as_str().to_string(),
            check_in,
            check_out,
        }
    }

    #[test]
    fn test_active_booking_predicate() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        let before = now - Duration::days(1);
        let after = now + Duration::days(1);

        assert!(is_active_booking(BookingStatus::Confirmed, before, after, now));
        assert!(is_active_booking(BookingStatus::CheckedIn, before, after, now));
        assert!(is_active_booking(BookingStatus::Confirmed, now, after, now));
        assert!(!is_active_booking(BookingStatus::Confirmed, before, now, now));
        assert!(!is_active_booking(BookingStatus::PreBooking, before, after, now));
        assert!(!is_active_booking(BookingStatus::CheckedOut, before, after, now));
        assert!(!is_active_booking(BookingStatus::Confirmed, after, after + Duration::days(1), now));
    }

    #[test]
    fn test_overstayed_checked_in_guest_is_still_active() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 15, 0, 0).unwrap();
        let check_in = now - Duration::days(2);
        let planned_out = now - Duration::hours(3);

        assert!(is_active_booking(BookingStatus::CheckedIn, check_in, planned_out, now));
        assert!(!is_active_booking(BookingStatus::Confirmed, check_in, planned_out, now));
    }

    #[test]
    fn test_available_room_without_booking_counts_as_available() {
        let now = Utc::now();
        let resolved = resolve_rooms(vec![room("101", RoomStatus::Available)], vec![], now);
        assert_eq!(resolved[0].effective_status, RoomStatus::Available);

        let counts = StatusCounts::from_statuses(resolved.iter().map(|r| r.effective_status));
        assert_eq!(counts.available, 1);
        assert_eq!(counts.occupied, 0);
        assert_eq!(counts.occupancy_rate, 0.0);
    }

    #[test]
    fn test_checked_in_booking_overrides_stored_status() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        let rooms = vec![
            room("101", RoomStatus::Available),
            room("102", RoomStatus::Cleaning),
            room("103", RoomStatus::Maintenance),
        ];
        let active = vec![
            booking("101", BookingStatus::CheckedIn, now - Duration::days(1), now + Duration::days(1)),
            booking("103", BookingStatus::CheckedIn, now - Duration::days(1), now + Duration::days(2)),
        ];

        let resolved = resolve_rooms(rooms, active, now);
        assert_eq!(resolved[0].effective_status, RoomStatus::Occupied);
        assert!(resolved[0].active_booking.is_some());
        assert_eq!(resolved[1].effective_status, RoomStatus::Cleaning);
        assert!(resolved[1].active_booking.is_none());
        assert_eq!(resolved[2].effective_status, RoomStatus::Occupied);

        let counts = StatusCounts::from_statuses(resolved.iter().map(|r| r.effective_status));
        assert_eq!(counts.total, 3);
        assert_eq!(counts.occupied, 2);
        assert_eq!(counts.cleaning, 1);
        assert_eq!(counts.available, 0);
        assert_eq!(counts.occupancy_rate, 66.67);
    }

    #[test]
    fn test_future_booking_does_not_occupy_room() {
        let now = Utc.with_ymd_and_hms(2025, 6, 10, 12, 0, 0).unwrap();
        let active = vec![booking("101", BookingStatus::Confirmed, now + Duration::hours(2), now + Duration::days(2))];
        let resolved = resolve_rooms(vec![room("101", RoomStatus::Available)], active, now);
        assert_eq!(resolved[0].effective_status, RoomStatus::Available);
        assert!(resolved[0].active_booking.is_none());
    }

    #[test]
    fn test_occupancy_rate_with_no_rooms() {
        assert_eq!(occupancy_rate(0, 0), 0.0);
        assert_eq!(occupancy_rate(1, 4), 25.0);
    }
}
