//! Built-in utility tools.
//!
//! Each tool deserializes its arguments into a typed request struct and
//! returns a structured JSON result. Domain errors (division by zero,
//! missing files, empty input) are plain `Err(String)` values converted
//! at the dispatch edge — never panics.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::registry::{RegistryError, ToolRegistry, ToolSpec};
use crate::store::TableStore;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
struct PairArgs {
    a: i64,
    b: i64,
}

#[derive(Debug, Deserialize)]
struct DivideArgs {
    a: f64,
    b: f64,
}

#[derive(Debug, Deserialize)]
struct StatsArgs {
    numbers: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct ListFilesArgs {
    #[serde(default = "default_dot")]
    path: String,
}

fn default_dot() -> String {
    ".".into()
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFileArgs {
    path: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct InsertUserArgs {
    name: String,
    age: i64,
}

fn parse_args<'a, T: Deserialize<'a>>(args: &'a Value) -> Result<T, String> {
    T::deserialize(args).map_err(|e| format!("invalid arguments: {e}"))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Arithmetic & statistics
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn add(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: PairArgs = parse_args(&args)?;
    Ok(json!(req.a + req.b))
}

fn multiply(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: PairArgs = parse_args(&args)?;
    Ok(json!(req.a * req.b))
}

fn divide(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: DivideArgs = parse_args(&args)?;
    if req.b == 0.0 {
        return Err("division by zero is not allowed".into());
    }
    Ok(json!(req.a / req.b))
}

fn stats(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: StatsArgs = parse_args(&args)?;
    if req.numbers.is_empty() {
        return Err("empty list provided".into());
    }

    let mut sorted = req.numbers.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len();
    let mean = sorted.iter().sum::<f64>() / n as f64;
    let median = if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    };

    Ok(json!({
        "mean": mean,
        "median": median,
        "min": sorted[0],
        "max": sorted[n - 1],
    }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// File I/O
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn list_files(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: ListFilesArgs = parse_args(&args)?;
    let entries = std::fs::read_dir(&req.path).map_err(|e| format!("cannot list {}: {e}", req.path))?;
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| format!("cannot list {}: {e}", req.path))?;
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    names.sort();
    Ok(json!(names))
}

fn read_file(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: ReadFileArgs = parse_args(&args)?;
    let content =
        std::fs::read_to_string(&req.path).map_err(|e| format!("no such file: {}: {e}", req.path))?;
    Ok(json!(content))
}

fn write_file(_store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: WriteFileArgs = parse_args(&args)?;
    std::fs::write(&req.path, req.content.as_bytes())
        .map_err(|e| format!("cannot write {}: {e}", req.path))?;
    Ok(json!(format!("file written: {}", req.path)))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// System & time
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn system_info(_store: &mut TableStore, _args: Value) -> Result<Value, String> {
    let cwd = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    Ok(json!({
        "platform": std::env::consts::OS,
        "arch": std::env::consts::ARCH,
        "server_version": env!("CARGO_PKG_VERSION"),
        "cwd": cwd,
    }))
}

fn current_time(_store: &mut TableStore, _args: Value) -> Result<Value, String> {
    Ok(json!(Utc::now().to_rfc3339()))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Table store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn create_table(store: &mut TableStore, _args: Value) -> Result<Value, String> {
    store.create_table();
    Ok(json!("table 'users' ensured"))
}

fn insert_user(store: &mut TableStore, args: Value) -> Result<Value, String> {
    let req: InsertUserArgs = parse_args(&args)?;
    let row = store.insert_user(&req.name, req.age)?;
    Ok(json!(format!("user {} added with id {}", row.name, row.id)))
}

fn get_users(store: &mut TableStore, _args: Value) -> Result<Value, String> {
    let rows = store.get_users()?;
    serde_json::to_value(rows).map_err(|e| e.to_string())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry assembly
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn number_pair_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "a": { "type": "number" },
            "b": { "type": "number" }
        },
        "required": ["a", "b"]
    })
}

fn empty_schema() -> Value {
    json!({ "type": "object", "properties": {} })
}

/// Build the registry with the full built-in tool set.
pub fn default_registry() -> Result<ToolRegistry, RegistryError> {
    let mut reg = ToolRegistry::new();

    reg.register(ToolSpec::new("add", "Add two integers.", number_pair_schema()), add)?;
    reg.register(
        ToolSpec::new("multiply", "Multiply two integers.", number_pair_schema()),
        multiply,
    )?;
    reg.register(
        ToolSpec::new(
            "divide",
            "Divide two numbers. Fails on division by zero.",
            number_pair_schema(),
        ),
        divide,
    )?;
    reg.register(
        ToolSpec::new(
            "stats",
            "Compute mean, median, min and max of a list of numbers.",
            json!({
                "type": "object",
                "properties": {
                    "numbers": { "type": "array", "items": { "type": "number" } }
                },
                "required": ["numbers"]
            }),
        ),
        stats,
    )?;
    reg.register(
        ToolSpec::new(
            "list_files",
            "List all files and directories in the given path.",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } }
            }),
        ),
        list_files,
    )?;
    reg.register(
        ToolSpec::new(
            "read_file",
            "Read the contents of a text file.",
            json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"]
            }),
        ),
        read_file,
    )?;
    reg.register(
        ToolSpec::new(
            "write_file",
            "Write text content to a file. Overwrites if the file exists.",
            json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" }
                },
                "required": ["path", "content"]
            }),
        ),
        write_file,
    )?;
    reg.register(
        ToolSpec::new("system_info", "Return basic system information.", empty_schema()),
        system_info,
    )?;
    reg.register(
        ToolSpec::new(
            "create_table",
            "Create the demo 'users' table if it does not exist.",
            empty_schema(),
        ),
        create_table,
    )?;
    reg.register(
        ToolSpec::new(
            "insert_user",
            "Insert a user into the 'users' table.",
            json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "age": { "type": "integer" }
                },
                "required": ["name", "age"]
            }),
        ),
        insert_user,
    )?;
    reg.register(
        ToolSpec::new("get_users", "Fetch all users from the 'users' table.", empty_schema()),
        get_users,
    )?;
    reg.register(
        ToolSpec::new(
            "current_time",
            "Return the current server time in ISO format.",
            empty_schema(),
        ),
        current_time,
    )?;

    Ok(reg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ToolError;
    use std::io::Write;

    #[test]
    fn default_registry_builds() {
        let reg = default_registry().unwrap();
        assert_eq!(reg.len(), 12);
        let names: Vec<_> = reg.descriptors().iter().map(|s| s.name.clone()).collect();
        assert!(names.contains(&"add".to_string()));
        assert!(names.contains(&"get_users".to_string()));
    }

    #[test]
    fn add_returns_seven() {
        let reg = default_registry().unwrap();
        let out = reg.dispatch("add", json!({"a": 3, "b": 4})).unwrap();
        assert_eq!(out, json!(7));
    }

    #[test]
    fn multiply_works() {
        let reg = default_registry().unwrap();
        assert_eq!(reg.dispatch("multiply", json!({"a": 6, "b": 7})).unwrap(), json!(42));
    }

    #[test]
    fn divide_by_zero_is_a_handler_failure() {
        let reg = default_registry().unwrap();
        let err = reg.dispatch("divide", json!({"a": 1.0, "b": 0.0})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::HandlerFailed { message, .. } if message.contains("zero")
        ));
    }

    #[test]
    fn divide_works() {
        let reg = default_registry().unwrap();
        assert_eq!(reg.dispatch("divide", json!({"a": 9.0, "b": 2.0})).unwrap(), json!(4.5));
    }

    #[test]
    fn stats_of_empty_list_fails() {
        let reg = default_registry().unwrap();
        let err = reg.dispatch("stats", json!({"numbers": []})).unwrap_err();
        assert!(matches!(err, ToolError::HandlerFailed { .. }));
    }

    #[test]
    fn stats_even_count_median_averages_middle_pair() {
        let reg = default_registry().unwrap();
        let out = reg
            .dispatch("stats", json!({"numbers": [4.0, 1.0, 3.0, 2.0]}))
            .unwrap();
        assert_eq!(out["mean"], json!(2.5));
        assert_eq!(out["median"], json!(2.5));
        assert_eq!(out["min"], json!(1.0));
        assert_eq!(out["max"], json!(4.0));
    }

    #[test]
    fn read_missing_file_is_a_handler_failure() {
        let reg = default_registry().unwrap();
        let err = reg
            .dispatch("read_file", json!({"path": "/nonexistent/toolwire-test"}))
            .unwrap_err();
        assert!(matches!(
            err,
            ToolError::HandlerFailed { message, .. } if message.contains("no such file")
        ));
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hello.txt");
        let path_str = path.display().to_string();

        let reg = default_registry().unwrap();
        reg.dispatch("write_file", json!({"path": path_str, "content": "Hello World"}))
            .unwrap();
        let out = reg.dispatch("read_file", json!({"path": path_str})).unwrap();
        assert_eq!(out, json!("Hello World"));
    }

    #[test]
    fn list_files_sees_created_entries() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join("a.txt")).unwrap();
        f.write_all(b"x").unwrap();
        std::fs::File::create(dir.path().join("b.txt")).unwrap();

        let reg = default_registry().unwrap();
        let out = reg
            .dispatch("list_files", json!({"path": dir.path().display().to_string()}))
            .unwrap();
        assert_eq!(out, json!(["a.txt", "b.txt"]));
    }

    #[test]
    fn user_table_flow() {
        let reg = default_registry().unwrap();

        // Insert before create fails like a real database.
        assert!(reg.dispatch("insert_user", json!({"name": "John", "age": 25})).is_err());

        reg.dispatch("create_table", json!({})).unwrap();
        reg.dispatch("insert_user", json!({"name": "John", "age": 25})).unwrap();
        reg.dispatch("insert_user", json!({"name": "Alice", "age": 30})).unwrap();

        let out = reg.dispatch("get_users", json!({})).unwrap();
        assert_eq!(out[0]["name"], json!("John"));
        assert_eq!(out[1]["name"], json!("Alice"));
        assert_eq!(out[1]["id"], json!(2));
    }

    #[test]
    fn invalid_arguments_are_handler_failures() {
        let reg = default_registry().unwrap();
        let err = reg.dispatch("add", json!({"a": "three"})).unwrap_err();
        assert!(matches!(
            err,
            ToolError::HandlerFailed { message, .. } if message.contains("invalid arguments")
        ));
    }

    #[test]
    fn current_time_is_rfc3339() {
        let reg = default_registry().unwrap();
        let out = reg.dispatch("current_time", json!({})).unwrap();
        let text = out.as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(text).is_ok());
    }
}
