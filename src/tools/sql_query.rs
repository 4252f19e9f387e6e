//! sql_query 工具：对医院数据库执行单条只读 SELECT

use std::sync::OnceLock;

use async_trait::async_trait;
use regex::Regex;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::database::{HospitalDb, READ_TABLES};
use crate::tools::schema::parameters_schema;
use crate::tools::{Tool, ToolError};

pub const SQL_QUERY_TOOL_NAME: &str = "sql_query";

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SqlQueryArgs {
    /// 单条 SELECT 语句，只能引用白名单中的表
    pub query: String,
}

pub struct SqlQueryTool {
    db: HospitalDb,
    description: String,
}

impl SqlQueryTool {
    pub fn new(db: HospitalDb) -> Self {
        let description = format!(
            "Runs one read-only SQL SELECT against the hospital database and returns the rows as a JSON array. \
             Tables: {}. Doctors have person_name and specialty_id; join SPECIALTIES for specialty_name.",
            READ_TABLES.join(", ")
        );
        Self { db, description }
    }
}

fn table_re() -> &'static Regex {
    static TABLE_RE: OnceLock<Regex> = OnceLock::new();
    TABLE_RE.get_or_init(|| Regex::new(&format!(r"(?i)\b(?:{})\b", READ_TABLES.join("|"))).unwrap())
}

/// 把字符串字面量、引号标识符与注释替换为空白，只留下语句结构
fn mask_literals(query: &str) -> String {
    let mut out = String::with_capacity(query.len());
    let mut chars = query.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                // '' 转义相当于两个相邻字面量，掩码结果相同
                for inner in chars.by_ref() {
                    if inner == c {
                        break;
                    }
                }
                out.push_str("''");
            }
            '-' if chars.peek() == Some(&'-') => {
                for inner in chars.by_ref() {
                    if inner == '\n' {
                        break;
                    }
                }
                out.push('\n');
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = ' ';
                for inner in chars.by_ref() {
                    if prev == '*' && inner == '/' {
                        break;
                    }
                    prev = inner;
                }
                out.push(' ');
            }
            _ => out.push(c),
        }
    }
    out
}

/// 校验查询：非空、SELECT 开头、单条语句、引用了已知表；返回去掉末尾分号的语句。
/// 表白名单最终由 HospitalDb::select 的 authorizer 强制执行，这里只给模型更明确的错误。
fn validate_query(query: &str) -> Result<&str, ToolError> {
    let q = query.trim().trim_end_matches(';').trim();
    if q.is_empty() {
        return Err(ToolError::InvalidArguments("query is empty".to_string()));
    }
    let masked = mask_literals(q);
    if !masked.trim_start().to_lowercase().starts_with("select") {
        return Err(ToolError::Rejected(
            "only SELECT statements are allowed".to_string(),
        ));
    }
    if masked.contains(';') {
        return Err(ToolError::Rejected(
            "only a single statement is allowed".to_string(),
        ));
    }
    if !table_re().is_match(&masked) {
        return Err(ToolError::Rejected(format!(
            "query must read from one of: {}",
            READ_TABLES.join(", ")
        )));
    }
    Ok(q)
}

#[async_trait]
impl Tool for SqlQueryTool {
    fn name(&self) -> &str {
        SQL_QUERY_TOOL_NAME
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<SqlQueryArgs>()
    }

    async fn invoke(&self, args: Value) -> Result<String, ToolError> {
        let args: SqlQueryArgs =
            serde_json::from_value(args).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        let query = validate_query(&args.query)?.to_string();
        tracing::debug!(query = %query, "sql_query");
        let rows = self.db.run_blocking(move |db| db.select(&query)).await?;
        serde_json::to_string(&rows).map_err(|e| ToolError::Failed(e.to_string()))
    }
}
