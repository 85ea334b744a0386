//! Fixtures shared by unit tests.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::models::{Event, User};

pub fn sample_event() -> Event {
    let start = Utc::now() + Duration::days(7);
    Event {
        id: Uuid::new_v4(),
        name: "Grad Banquet".to_string(),
        description: "Dinner and dance".to_string(),
        img_urls: vec![],
        location: "Main Hall".to_string(),
        address: "100 School Rd".to_string(),
        start_timestamp: start,
        end_timestamp: start + Duration::hours(4),
        custom_fields_schema: None,
    }
}

pub fn sample_user(id: &str, student_number: &str) -> User {
    User {
        id: id.to_string(),
        admin: false,
        student_number: student_number.to_string(),
        full_name: format!("Student {student_number}"),
        pfp_url: String::new(),
    }
}
