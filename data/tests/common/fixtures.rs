use chrono::{DateTime, Duration, TimeZone, Utc};
use data::db::{ContactSubmissionsCRUD, PackagesCRUD, SourceDb, StatusUpdatesCRUD};
use data::model::{ContactSubmission, Package, PackageStatus, StatusUpdate};
use std::path::Path;

/// Status updates per seeded package; sums to 12
const UPDATES_PER_PACKAGE: [usize; 5] = [3, 3, 2, 2, 2];

fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap()
}

pub fn package(index: usize) -> Package {
    Package {
        id: format!("pkg-{:03}", index),
        tracking_number: format!("TRK{:08}", index),
        status: PackageStatus::InTransit,
        current_location: "Memphis, TN".to_string(),
        destination: format!("{} Main St, Springfield", 100 + index),
        estimated_delivery: Some(base_time() + Duration::days(3)),
        last_updated: base_time() + Duration::hours(index as i64),
        customer_name: Some(format!("Customer {}", index)),
        customer_email: (index % 2 == 0).then(|| format!("customer{}@example.com", index)),
    }
}

pub fn status_update(package_id: &str, index: usize) -> StatusUpdate {
    StatusUpdate {
        id: format!("{}-update-{}", package_id, index),
        package_id: package_id.to_string(),
        status: PackageStatus::ALL[index % PackageStatus::ALL.len()],
        location: format!("Hub {}", index),
        timestamp: base_time() + Duration::minutes(index as i64 * 30),
        notes: (index == 0).then(|| "Label created".to_string()),
    }
}

pub fn contact_submission(index: usize) -> ContactSubmission {
    ContactSubmission {
        id: format!("contact-{:03}", index),
        name: format!("Sender {}", index),
        email: format!("sender{}@example.com", index),
        message: format!("Where is my package? ({})", index),
        submitted_at: base_time() + Duration::hours(index as i64),
        resolved: index == 0,
    }
}

/// Source database with 5 packages, 12 status updates and 3 contact submissions
pub fn seed_source(path: &Path) -> SourceDb {
    let source = SourceDb::create(path).expect("Failed to create source database");

    for (index, updates) in UPDATES_PER_PACKAGE.iter().enumerate() {
        let package = package(index);
        source.insert_package(&package).expect("Failed to insert package");
        for update in 0..*updates {
            source
                .insert_status_update(&status_update(&package.id, update))
                .expect("Failed to insert status update");
        }
    }
    for index in 0..3 {
        source
            .insert_contact_submission(&contact_submission(index))
            .expect("Failed to insert contact submission");
    }

    source
}
