use crate::models::{patient, procedure, user};
use sea_orm::sea_query::OnConflict;
use sea_orm::*;

pub async fn seed_demo_data(db: &DatabaseConnection) -> Result<(), DbErr> {
    let now = chrono::Utc::now().to_rfc3339();

    // 1. Create Users
    for (username, role) in [("admin", "admin"), ("perawat", "staff")] {
        let staff = user::ActiveModel {
            username: Set(username.to_owned()),
            role: Set(role.to_owned()),
            created_at: Set(now.clone()),
            updated_at: Set(now.clone()),
            ..Default::default()
        };

        user::Entity::insert(staff)
            .on_conflict(
                OnConflict::column(user::Column::Username)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
    }

    // 2. Create Patients
    let patients = [
        ("RM-0001", "Siti Rahayu", "F", "1987-04-12"),
        ("RM-0002", "Budi Santoso", "M", "1975-11-02"),
        ("RM-0003", "Dewi Lestari", "F", "1993-06-30"),
        ("RM-0004", "Agus Pratama", "M", "2001-01-19"),
    ];

    for (mrn, name, gender, birth_date) in patients {
        let row = patient::ActiveModel {
            medical_record_number: Set(mrn.to_owned()),
            name: Set(name.to_owned()),
            gender: Set(Some(gender.to_owned())),
            birth_date: Set(Some(birth_date.to_owned())),
            status: Set("active".to_owned()),
            created_at: Set(now.clone()),
            updated_at: Set(now.clone()),
            ..Default::default()
        };

        patient::Entity::insert(row)
            .on_conflict(
                OnConflict::column(patient::Column::MedicalRecordNumber)
                    .do_nothing()
                    .to_owned(),
            )
            .exec_without_returning(db)
            .await?;
    }

    // 3. Create Procedures (only on a fresh database)
    if procedure::Entity::find().count(db).await? > 0 {
        return Ok(());
    }

    let patient_ids: Vec<i32> = patient::Entity::find()
        .order_by_asc(patient::Column::Id)
        .all(db)
        .await?
        .into_iter()
        .map(|p| p.id)
        .collect();

    let catalogue = [
        ("TD-001", "Pemeriksaan umum", 75_000.0),
        ("TD-014", "Perawatan luka", 120_000.0),
        ("TD-022", "Nebulizer", 95_000.0),
    ];

    for (i, patient_id) in patient_ids.iter().enumerate() {
        for (code, name, tariff) in catalogue.iter().take(i % catalogue.len() + 1) {
            let row = procedure::ActiveModel {
                patient_id: Set(*patient_id),
                procedure_code: Set(code.to_string()),
                name: Set(name.to_string()),
                performed_at: Set(Some(now.clone())),
                tariff: Set(*tariff),
                status: Set("pending".to_owned()),
                created_at: Set(now.clone()),
                updated_at: Set(now.clone()),
                ..Default::default()
            };
            row.insert(db).await?;
        }
    }

    Ok(())
}
