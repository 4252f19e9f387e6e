//! schedule_appointment 工具：检查医生时段并预约
//!
//! 业务结果（成功、时段占用、医生/患者不存在）以 JSON status 返回；参数格式错误返回 ToolError，
//! 让模型有机会修正后重试。

use async_trait::async_trait;
use chrono::NaiveDateTime;
use rusqlite::{params, OptionalExtension};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::tools::database::HospitalDb;
use crate::tools::schema::parameters_schema;
use crate::tools::{Tool, ToolError};

pub const SCHEDULING_TOOL_NAME: &str = "schedule_appointment";

/// 预约时间格式
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const STATUS_SCHEDULED: &str = "scheduled";
pub const STATUS_UNAVAILABLE: &str = "unavailable";
pub const STATUS_INVALID_REQUEST: &str = "invalid_request";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScheduleArgs {
    /// DOCTORS.doctor_id
    pub doctor_id: i64,
    /// 预约时间，格式 'YYYY-MM-DD HH:MM:SS'
    pub date_time: String,
    /// PATIENTS.patient_id
    pub patient_id: i64,
}

pub struct ScheduleAppointmentTool {
    db: HospitalDb,
}

impl ScheduleAppointmentTool {
    pub fn new(db: HospitalDb) -> Self {
        Self { db }
    }
}

/// 检查并写入预约；查询与插入在同一把锁内完成
fn schedule(db: &HospitalDb, doctor_id: i64, date_time: &str, patient_id: i64) -> Result<Value, rusqlite::Error> {
    db.with_connection(|conn| {
        let doctor: Option<(String, String)> = conn
            .query_row(
                "SELECT d.person_name, s.specialty_name
                 FROM DOCTORS d JOIN SPECIALTIES s ON d.specialty_id = s.specialty_id
                 WHERE d.doctor_id = ?1",
                params![doctor_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((doctor_name, specialty)) = doctor else {
            return Ok(json!({
                "status": STATUS_INVALID_REQUEST,
                "message": format!("No doctor with id {doctor_id} was found."),
            }));
        };

        let patient: Option<i64> = conn
            .query_row(
                "SELECT patient_id FROM PATIENTS WHERE patient_id = ?1",
                params![patient_id],
                |row| row.get(0),
            )
            .optional()?;
        if patient.is_none() {
            return Ok(json!({
                "status": STATUS_INVALID_REQUEST,
                "message": format!("No patient with id {patient_id} was found."),
            }));
        }

        let taken: Option<i64> = conn
            .query_row(
                "SELECT appointment_id FROM APPOINTMENTS WHERE doctor_id = ?1 AND date_time = ?2",
                params![doctor_id, date_time],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Ok(json!({
                "status": STATUS_UNAVAILABLE,
                "doctor": doctor_name,
                "specialty": specialty,
                "date_time": date_time,
                "message": format!("Dr. {doctor_name} is not available at {date_time}. Please choose another time."),
            }));
        }

        conn.execute(
            "INSERT INTO APPOINTMENTS (patient_id, doctor_id, date_time, visit_type) VALUES (?1, ?2, ?3, 'in-person')",
            params![patient_id, doctor_id, date_time],
        )?;
        Ok(json!({
            "status": STATUS_SCHEDULED,
            "appointment_id": conn.last_insert_rowid(),
            "doctor": doctor_name,
            "specialty": specialty,
            "date_time": date_time,
            "message": "Appointment scheduled successfully!",
        }))
    })
}

#[async_trait]
impl Tool for ScheduleAppointmentTool {
    fn name(&self) -> &str {
        SCHEDULING_TOOL_NAME
    }

    fn description(&self) -> &str {
        "Checks whether a doctor is free at the given date and time and, if so, books the appointment for the patient. \
         date_time must use the format 'YYYY-MM-DD HH:MM:SS'."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<ScheduleArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let args: ScheduleArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let when = NaiveDateTime::parse_from_str(args.date_time.trim(), DATE_TIME_FORMAT).map_err(|e| {
            ToolError::InvalidArguments(format!(
                "date_time '{}' must use the format YYYY-MM-DD HH:MM:SS ({e})",
                args.date_time
            ))
        })?;
        let date_time = when.format(DATE_TIME_FORMAT).to_string();
        let (doctor_id, patient_id) = (args.doctor_id, args.patient_id);
        let slot = date_time.clone();
        let result = self
            .db
            .run_blocking(move |db| Ok(schedule(db, doctor_id, &slot, patient_id)?))
            .await?;
        tracing::info!(
            doctor_id = args.doctor_id,
            patient_id = args.patient_id,
            date_time = %date_time,
            status = %result["status"],
            "schedule_appointment"
        );
        Ok(result.to_string())
    }
}
