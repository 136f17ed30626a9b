//! The static command descriptor table
//!
//! Each row binds a topic keyword to the payload field it triggers on and an
//! extractor producing the typed [`Command`]. An extractor returns
//! `Ok(None)` when the trigger condition is simply not met (field absent,
//! query or trigger value different) and `Err` when the payload is present
//! but unusable.

use super::command::Command;
use super::extract::{
    array_field, bool_field, has, int_field, object_element, string_field, text_field,
    ExtractError, Payload,
};
use crate::protocol::{contains_keyword, TopicBuilder};
use once_cell::sync::Lazy;

pub type ExtractResult = Result<Option<Command>, ExtractError>;

type Extractor = Box<dyn Fn(&Payload) -> ExtractResult + Send + Sync>;

/// Field carrying the expected value of query-style commands
pub const QUERY_FIELD: &str = "query";
/// Auxiliary task identifier read by deployment and privileged descriptors
pub const TASK_ID_FIELD: &str = "taskId";

/// One routing table row
pub struct CommandDescriptor {
    /// Matched case-insensitively anywhere in the topic
    pub keyword: &'static str,
    /// Payload field whose presence triggers extraction
    pub field: &'static str,
    extract: Extractor,
}

impl CommandDescriptor {
    fn new(
        keyword: &'static str,
        field: &'static str,
        extract: impl Fn(&Payload) -> ExtractResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            keyword,
            field,
            extract: Box::new(extract),
        }
    }

    pub fn matches(&self, topic: &str) -> bool {
        contains_keyword(topic, self.keyword)
    }

    pub fn extract(&self, payload: &Payload) -> ExtractResult {
        (self.extract)(payload)
    }
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("keyword", &self.keyword)
            .field("field", &self.field)
            .finish_non_exhaustive()
    }
}

/// `{"query": "<expected>"}`, compared case-insensitively
fn query(keyword: &'static str, expected: &'static str, command: Command) -> CommandDescriptor {
    CommandDescriptor::new(keyword, QUERY_FIELD, move |payload| {
        if !has(payload, QUERY_FIELD) {
            return Ok(None);
        }
        let value = string_field(payload, QUERY_FIELD)?;
        Ok(value
            .eq_ignore_ascii_case(expected)
            .then(|| command.clone()))
    })
}

/// Fires only when the field equals `NOW`, case-insensitively
fn now_trigger(field: &'static str, command: Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        if !has(payload, field) {
            return Ok(None);
        }
        let value = string_field(payload, field)?;
        Ok(value.eq_ignore_ascii_case("now").then(|| command.clone()))
    })
}

fn lock() -> CommandDescriptor {
    CommandDescriptor::new("lock", "lock", |payload| {
        if !has(payload, "lock") {
            return Ok(None);
        }
        // Any value locks; only "now" locks immediately
        let value = text_field(payload, "lock")?;
        Ok(Some(Command::Lock {
            immediate: value.eq_ignore_ascii_case("now"),
        }))
    })
}

/// `{"subscribe": [{"topic": "..."}, ...]}`; any bad element rejects the
/// whole request
fn subscribe() -> CommandDescriptor {
    CommandDescriptor::new("subscribe", "subscribe", |payload| {
        if !has(payload, "subscribe") {
            return Ok(None);
        }
        let items = array_field(payload, "subscribe")?;
        let filters = (0..items.len())
            .map(|index| -> Result<String, ExtractError> {
                let element = object_element(items, "subscribe", index)?;
                let topic = string_field(element, "topic")?;
                Ok(TopicBuilder::build_child_filter(&topic))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(Command::Subscribe { filters }))
    })
}

fn presence(field: &'static str, command: Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        Ok(has(payload, field).then(|| command.clone()))
    })
}

fn string_setter(field: &'static str, build: fn(String) -> Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        if !has(payload, field) {
            return Ok(None);
        }
        Ok(Some(build(string_field(payload, field)?)))
    })
}

fn int_setter(field: &'static str, build: fn(i64) -> Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        if !has(payload, field) {
            return Ok(None);
        }
        Ok(Some(build(int_field(payload, field)?)))
    })
}

fn bool_setter(field: &'static str, build: fn(bool) -> Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        if !has(payload, field) {
            return Ok(None);
        }
        Ok(Some(build(bool_field(payload, field)?)))
    })
}

/// Like [`bool_setter`] but also requires `taskId`, which is read and not
/// forwarded
fn task_bool_setter(field: &'static str, build: fn(bool) -> Command) -> CommandDescriptor {
    CommandDescriptor::new(field, field, move |payload| {
        if !has(payload, field) {
            return Ok(None);
        }
        let value = bool_field(payload, field)?;
        string_field(payload, TASK_ID_FIELD)?;
        Ok(Some(build(value)))
    })
}

fn deploy_app() -> CommandDescriptor {
    CommandDescriptor::new("deployApp", "deployApp", |payload| {
        if !has(payload, "deployApp") {
            return Ok(None);
        }
        Ok(Some(Command::DeployApp {
            package: string_field(payload, "deployApp")?,
            id: string_field(payload, "id")?,
            version_code: string_field(payload, "versionCode")?,
            task_id: string_field(payload, TASK_ID_FIELD)?,
        }))
    })
}

fn remove_app() -> CommandDescriptor {
    CommandDescriptor::new("removeApp", "removeApp", |payload| {
        if !has(payload, "removeApp") {
            return Ok(None);
        }
        let package = string_field(payload, "removeApp")?;
        // Required but not part of the capability call
        string_field(payload, TASK_ID_FIELD)?;
        Ok(Some(Command::RemoveApp { package }))
    })
}

fn deploy_file() -> CommandDescriptor {
    CommandDescriptor::new("deployFile", "deployFile", |payload| {
        if !has(payload, "deployFile") {
            return Ok(None);
        }
        Ok(Some(Command::DeployFile {
            file: string_field(payload, "deployFile")?,
            id: string_field(payload, "id")?,
            version: string_field(payload, "version")?,
            task_id: string_field(payload, TASK_ID_FIELD)?,
        }))
    })
}

fn remove_file() -> CommandDescriptor {
    CommandDescriptor::new("removeFile", "removeFile", |payload| {
        if !has(payload, "removeFile") {
            return Ok(None);
        }
        let file = string_field(payload, "removeFile")?;
        string_field(payload, TASK_ID_FIELD)?;
        Ok(Some(Command::RemoveFile { file }))
    })
}

/// Every descriptor, in evaluation order
pub static DESCRIPTORS: Lazy<Vec<CommandDescriptor>> = Lazy::new(|| {
    vec![
        query("ping", "Ping", Command::Ping),
        query("geolocate", "Geolocate", Command::Geolocate),
        query("inventory", "Inventory", Command::Inventory),
        lock(),
        now_trigger("wipe", Command::Wipe),
        now_trigger("unenroll", Command::Unenroll),
        subscribe(),
        presence("passwordEnabled", Command::PasswordEnabled),
        string_setter("passwordQuality", Command::PasswordQuality),
        int_setter("passwordMinLength", Command::PasswordMinLength),
        int_setter("passwordMinLowerCase", Command::PasswordMinLowerCase),
        int_setter("passwordMinUpperCase", Command::PasswordMinUpperCase),
        int_setter("passwordMinNonLetter", Command::PasswordMinNonLetter),
        int_setter("passwordMinLetters", Command::PasswordMinLetters),
        int_setter("passwordMinNumeric", Command::PasswordMinNumeric),
        int_setter("passwordMinSymbols", Command::PasswordMinSymbols),
        int_setter(
            "MaximumFailedPasswordsForWipe",
            Command::MaximumFailedPasswordsForWipe,
        ),
        int_setter("MaximumTimeToLock", Command::MaximumTimeToLock),
        bool_setter("storageEncryption", Command::StorageEncryption),
        bool_setter("disableCamera", Command::DisableCamera),
        bool_setter("disableBluetooth", Command::DisableBluetooth),
        deploy_app(),
        remove_app(),
        deploy_file(),
        remove_file(),
        task_bool_setter("disableScreenCapture", Command::DisableScreenCapture),
        task_bool_setter("disableAirplaneMode", Command::DisableAirplaneMode),
        task_bool_setter("disableGPS", Command::DisableGps),
    ]
});
