//! 医院数据库（SQLite）
//!
//! 启动时建表并在空库时写入演示数据；工具通过 HospitalDb 读写。
//! 连接放在 std Mutex 后面，所有方法都是同步的；异步工具经 run_blocking 在阻塞线程池中调用，
//! 不占用运行时 worker，分发器的超时因此总能生效。

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rusqlite::hooks::{AuthAction, AuthContext, Authorization};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, Params, Statement};
use serde_json::{Map, Value};

use crate::tools::ToolError;

/// 允许 sql_query 读取的表
pub const READ_TABLES: &[&str] = &[
    "PATIENTS",
    "SPECIALTIES",
    "DOCTORS",
    "APPOINTMENTS",
    "MEDICAL_RECORDS",
];

/// 内存库路径
pub const IN_MEMORY: &str = ":memory:";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS SPECIALTIES (
    specialty_id INTEGER PRIMARY KEY,
    specialty_name TEXT NOT NULL UNIQUE
);
CREATE TABLE IF NOT EXISTS DOCTORS (
    doctor_id INTEGER PRIMARY KEY,
    person_name TEXT NOT NULL,
    license_number TEXT NOT NULL,
    specialty_id INTEGER NOT NULL REFERENCES SPECIALTIES(specialty_id)
);
CREATE TABLE IF NOT EXISTS PATIENTS (
    patient_id INTEGER PRIMARY KEY,
    person_name TEXT NOT NULL,
    birth_date TEXT,
    document TEXT,
    phone TEXT,
    address TEXT
);
CREATE TABLE IF NOT EXISTS APPOINTMENTS (
    appointment_id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES PATIENTS(patient_id),
    doctor_id INTEGER NOT NULL REFERENCES DOCTORS(doctor_id),
    date_time TEXT NOT NULL,
    visit_type TEXT,
    price REAL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_appointments_slot ON APPOINTMENTS(doctor_id, date_time);
CREATE TABLE IF NOT EXISTS MEDICAL_RECORDS (
    record_id INTEGER PRIMARY KEY AUTOINCREMENT,
    patient_id INTEGER NOT NULL REFERENCES PATIENTS(patient_id),
    doctor_id INTEGER NOT NULL REFERENCES DOCTORS(doctor_id),
    created_at TEXT NOT NULL,
    notes TEXT
);
";

const SEED_SQL: &str = "
INSERT INTO SPECIALTIES (specialty_id, specialty_name) VALUES
    (1, 'Cardiology'),
    (2, 'Pediatrics'),
    (3, 'Dermatology'),
    (4, 'Orthopedics'),
    (5, 'Neurology');
INSERT INTO DOCTORS (doctor_id, person_name, license_number, specialty_id) VALUES
    (1, 'Ana Souza', 'CRM-SP 123456', 1),
    (2, 'Lee Park', 'CRM-SP 234567', 2),
    (3, 'Marina Costa', 'CRM-SP 345678', 3),
    (4, 'Rafael Lima', 'CRM-SP 456789', 4),
    (5, 'Helena Rocha', 'CRM-SP 567890', 5),
    (6, 'Paulo Mendes', 'CRM-SP 678901', 1);
INSERT INTO PATIENTS (patient_id, person_name, birth_date, document, phone, address) VALUES
    (1, 'João Silva', '1980-05-12', '123.456.789-00', '(11) 98888-0001', 'Rua das Flores, 100'),
    (2, 'Maria Oliveira', '1992-11-03', '234.567.890-11', '(11) 98888-0002', 'Av. Paulista, 2000'),
    (3, 'Carlos Pereira', '1975-02-27', '345.678.901-22', '(11) 98888-0003', 'Rua Augusta, 55');
INSERT INTO APPOINTMENTS (patient_id, doctor_id, date_time, visit_type, price) VALUES
    (1, 1, '2025-12-15 14:00:00', 'in-person', 350.0),
    (2, 2, '2025-12-16 09:30:00', 'telemedicine', 200.0);
INSERT INTO MEDICAL_RECORDS (patient_id, doctor_id, created_at, notes) VALUES
    (1, 1, '2025-06-01 10:00:00', 'Routine check-up. Blood pressure within normal range.');
";

/// 共享的医院数据库句柄（克隆代价很小）
#[derive(Clone)]
pub struct HospitalDb {
    conn: Arc<Mutex<Connection>>,
}

impl HospitalDb {
    /// 打开（或创建）数据库；path 为 ":memory:" 时使用内存库
    pub fn open(path: &str) -> Result<Self, rusqlite::Error> {
        let conn = if path == IN_MEMORY {
            Connection::open_in_memory()?
        } else {
            Connection::open(path)?
        };
        Self::init(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self, rusqlite::Error> {
        Self::open(IN_MEMORY)
    }

    fn init(conn: &Connection) -> Result<(), rusqlite::Error> {
        conn.execute_batch(SCHEMA_SQL)?;
        let seeded: i64 = conn.query_row("SELECT COUNT(*) FROM SPECIALTIES", [], |row| row.get(0))?;
        if seeded == 0 {
            conn.execute_batch(SEED_SQL)?;
            tracing::info!("hospital database seeded with demo data");
        }
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在持锁状态下执行一段同步逻辑（多条语句需要原子完成时使用）
    pub fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, rusqlite::Error>,
    ) -> Result<T, rusqlite::Error> {
        let conn = self.lock();
        f(&conn)
    }

    /// 执行查询并把每行转成 JSON 对象（列名 -> 值）
    pub fn query_rows<P: Params>(&self, sql: &str, params: P) -> Result<Vec<Map<String, Value>>, rusqlite::Error> {
        let conn = self.lock();
        let mut stmt = conn.prepare(sql)?;
        rows_to_json(&mut stmt, params)
    }

    /// 只读查询：编译期间由 authorizer 限制只能读白名单中的表，写语句直接拒绝
    pub fn select(&self, sql: &str) -> Result<Vec<Map<String, Value>>, ToolError> {
        let conn = self.lock();
        conn.authorizer(Some(read_only_authorizer));
        let result = select_authorized(&conn, sql);
        conn.authorizer(None::<fn(AuthContext<'_>) -> Authorization>);
        result
    }

    /// 在阻塞线程池中执行同步数据库操作
    pub async fn run_blocking<T, F>(&self, f: F) -> Result<T, ToolError>
    where
        F: FnOnce(&HospitalDb) -> Result<T, ToolError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| ToolError::Failed(format!("database task failed: {e}")))?
    }
}

fn read_only_authorizer(ctx: AuthContext<'_>) -> Authorization {
    match ctx.action {
        AuthAction::Select | AuthAction::Function { .. } => Authorization::Allow,
        AuthAction::Read { table_name, .. }
            if READ_TABLES.iter().any(|t| t.eq_ignore_ascii_case(table_name)) =>
        {
            Authorization::Allow
        }
        _ => Authorization::Deny,
    }
}

fn select_authorized(conn: &Connection, sql: &str) -> Result<Vec<Map<String, Value>>, ToolError> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::AuthorizationForStatementDenied => {
            return Err(ToolError::Rejected(format!(
                "query may only read from: {}",
                READ_TABLES.join(", ")
            )));
        }
        Err(e) => return Err(e.into()),
    };
    if !stmt.readonly() {
        return Err(ToolError::Rejected(
            "only read-only statements are allowed".to_string(),
        ));
    }
    Ok(rows_to_json(&mut stmt, [])?)
}

fn rows_to_json<P: Params>(stmt: &mut Statement<'_>, params: P) -> Result<Vec<Map<String, Value>>, rusqlite::Error> {
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let rows = stmt.query_map(params, |row| {
        let mut obj = Map::with_capacity(columns.len());
        for (i, name) in columns.iter().enumerate() {
            obj.insert(name.clone(), json_value(row.get_ref(i)?));
        }
        Ok(obj)
    })?;
    rows.collect()
}

fn json_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::String(format!("<{} bytes>", b.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_tables() {
        let db = HospitalDb::open_in_memory().unwrap();
        let rows = db
            .query_rows("SELECT specialty_name FROM SPECIALTIES ORDER BY specialty_id", [])
            .unwrap();
        assert_eq!(rows.len(), 5);
        assert_eq!(rows[0]["specialty_name"], "Cardiology");
    }

    #[test]
    fn test_select_rejects_writes() {
        let db = HospitalDb::open_in_memory().unwrap();
        let err = db.select("DELETE FROM PATIENTS").unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));
    }

    #[test]
    fn test_select_only_reads_known_tables() {
        let db = HospitalDb::open_in_memory().unwrap();
        let err = db.select("SELECT d.person_name, m.sql FROM DOCTORS d, sqlite_master m").unwrap_err();
        assert!(matches!(err, ToolError::Rejected(_)));

        let rows = db
            .select("SELECT d.person_name, s.specialty_name FROM DOCTORS d JOIN SPECIALTIES s ON d.specialty_id = s.specialty_id")
            .unwrap();
        assert_eq!(rows.len(), 6);

        // authorizer 只在 select 期间生效
        let rows = db.query_rows("SELECT COUNT(*) AS n FROM sqlite_master", []).unwrap();
        assert!(rows[0]["n"].as_i64().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_run_blocking() {
        let db = HospitalDb::open_in_memory().unwrap();
        let rows = db
            .run_blocking(|db| db.select("SELECT specialty_name FROM SPECIALTIES"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 5);
    }

    #[test]
    fn test_reopen_file_does_not_reseed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hospital.db");
        let path = path.to_str().unwrap();

        HospitalDb::open(path).unwrap();
        let db = HospitalDb::open(path).unwrap();
        let rows = db.query_rows("SELECT COUNT(*) AS n FROM DOCTORS", []).unwrap();
        assert_eq!(rows[0]["n"], 6);
    }
}
