//! Celery protocol v1 の envelope
//!
//! フィールド順はワイヤ上の順序と一致させてある（serialize 結果がそのまま比較できる）。

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Number, Value};

use crate::domain::{ArgMap, KWArgMap, Request, Timestamp};

/// タスク envelope
///
/// 空・ゼロ・false の項目は出力しない。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CeleryTask {
    #[serde(rename = "task")]
    pub name: String,
    pub id: String,
    #[serde(default, skip_serializing_if = "ArgMap::is_empty")]
    pub args: ArgMap,
    #[serde(default, skip_serializing_if = "KWArgMap::is_empty")]
    pub kwargs: KWArgMap,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_zero")]
    pub retries: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<Timestamp>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "is_false")]
    pub utc: bool,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub callbacks: Vec<String>,
    #[serde(default, deserialize_with = "nullable", skip_serializing_if = "Vec::is_empty")]
    pub errbacks: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timelimit: Option<[Option<Number>; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taskset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chord: Option<String>,
}

impl CeleryTask {
    /// envelope を Request に写す。返信先は delivery のメタデータから来る。
    pub fn into_request(self, reply_to: Option<&str>) -> Request {
        let mut request = Request::new(self.name, self.id)
            .with_args(self.args)
            .with_kwargs(self.kwargs);
        request.retries = self.retries;
        request.eta = self.eta;
        request.expires = self.expires;
        request.utc = self.utc;
        request.callbacks = self.callbacks;
        request.errbacks = self.errbacks;
        request.timelimit = self.timelimit;
        request.taskset = self.taskset;
        request.chord = self.chord;
        match reply_to {
            Some(reply_to) => request.with_reply_to(reply_to),
            None => request,
        }
    }
}

impl From<&Request> for CeleryTask {
    fn from(request: &Request) -> Self {
        Self {
            name: request.name.clone(),
            id: request.id.clone(),
            args: request.args.clone(),
            kwargs: request.kwargs.clone(),
            retries: request.retries,
            eta: request.eta.clone(),
            expires: request.expires.clone(),
            utc: request.utc,
            callbacks: request.callbacks.clone(),
            errbacks: request.errbacks.clone(),
            timelimit: request.timelimit.clone(),
            taskset: request.taskset.clone(),
            chord: request.chord.clone(),
        }
    }
}

/// 結果 envelope。全フィールドを常に出力する（traceback は null になりうる）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CeleryResult {
    pub status: String,
    pub traceback: Option<String>,
    pub result: Value,
    pub task_id: String,
    #[serde(default, deserialize_with = "nullable")]
    pub children: Vec<String>,
}

/// `FAILURE` の result に入る例外表現
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeleryExceptionResult {
    pub exc_message: String,
    pub exc_type: String,
}

impl CeleryExceptionResult {
    pub fn new(exc_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exc_message: message.into(),
            exc_type: exc_type.into(),
        }
    }

    pub fn into_value(self) -> Value {
        serde_json::json!({
            "exc_message": self.exc_message,
            "exc_type": self.exc_type,
        })
    }
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// `null` を既定値として読む
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::rstest;
    use serde_json::json;

    #[test]
    fn protocol_v1_payload_with_nulls_decodes() {
        let payload = r#"{
            "expires":null,
            "utc":true,
            "args":[],
            "chord":null,
            "callbacks":null,
            "errbacks":null,
            "taskset":null,
            "id":"00000000-0000-0000-0000-000000000000",
            "retries":0,
            "task":"tasks.hello_world",
            "timelimit":[null,null],
            "eta":null,
            "kwargs":{}
        }"#;

        let task: CeleryTask = serde_json::from_str(payload).unwrap();

        let expected = CeleryTask {
            name: "tasks.hello_world".to_string(),
            id: "00000000-0000-0000-0000-000000000000".to_string(),
            utc: true,
            timelimit: Some([None, None]),
            ..Default::default()
        };
        assert_eq!(task, expected);
    }

    #[rstest]
    #[case::every_field(
        r#"{"task":"tasks.add","id":"X","args":[2,null,"c"],"kwargs":{"scale":1.5},"retries":2,"eta":"2024-01-01T12:00:00+00:00","expires":"2024-01-02T00:00:00.250+00:00","utc":true,"callbacks":["tasks.cb"],"errbacks":["tasks.eb"],"timelimit":[30.5,null],"taskset":"group-1","chord":"chord-1"}"#
    )]
    #[case::integer_timelimit(r#"{"task":"tasks.add","id":"X","timelimit":[30,60]}"#)]
    #[case::zulu_eta(r#"{"task":"tasks.add","id":"X","eta":"2024-01-01T12:00:00.123456Z"}"#)]
    #[case::naive_eta(
        r#"{"task":"tasks.add","id":"X","eta":"2024-01-01T12:00:00.123456","expires":"2024-01-02T00:00:00"}"#
    )]
    fn documented_fields_roundtrip_byte_for_byte(#[case] wire: &str) {
        let task: CeleryTask = serde_json::from_str(wire).unwrap();
        assert_eq!(serde_json::to_string(&task).unwrap(), wire);
    }

    #[test]
    fn roundtrip_through_request_keeps_wire_text() {
        let wire = r#"{"task":"tasks.add","id":"X","eta":"2024-01-01T12:00:00.123456Z","timelimit":[30,null]}"#;

        let request = serde_json::from_str::<CeleryTask>(wire)
            .unwrap()
            .into_request(None);
        assert_eq!(
            request.timelimit,
            Some([Some(Number::from(30)), None])
        );
        assert_eq!(
            serde_json::to_string(&CeleryTask::from(&request)).unwrap(),
            wire
        );
    }

    #[test]
    fn empty_fields_are_omitted() {
        let task = CeleryTask {
            name: "tasks.ping".to_string(),
            id: "1".to_string(),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_string(&task).unwrap(),
            r#"{"task":"tasks.ping","id":"1"}"#
        );
    }

    #[test]
    fn naive_timestamps_are_read_as_utc() {
        let task: CeleryTask = serde_json::from_value(json!({
            "task": "tasks.later",
            "id": "1",
            "eta": "2024-03-04T05:06:07.123456",
        }))
        .unwrap();

        let expected = Utc.with_ymd_and_hms(2024, 3, 4, 5, 6, 7).unwrap()
            + chrono::Duration::microseconds(123_456);
        assert_eq!(task.eta.map(|eta| eta.at()), Some(expected));
    }

    #[test]
    fn into_request_maps_every_field() {
        let task = CeleryTask {
            name: "tasks.add".to_string(),
            id: "X".to_string(),
            args: ArgMap::from(vec![json!(2), json!(3)]),
            retries: 1,
            utc: true,
            callbacks: vec!["tasks.cb".to_string()],
            taskset: Some("g".to_string()),
            ..Default::default()
        };

        let request = task.clone().into_request(Some("amq.gen-reply"));
        assert_eq!(request.name, "tasks.add");
        assert_eq!(request.id, "X");
        assert_eq!(request.must_arg(0), &json!(2));
        assert_eq!(request.retries, 1);
        assert!(request.utc);
        assert_eq!(request.callbacks, vec!["tasks.cb".to_string()]);
        assert_eq!(request.taskset.as_deref(), Some("g"));
        assert_eq!(request.reply_to(), Some("amq.gen-reply"));

        assert_eq!(CeleryTask::from(&request), task);
    }

    #[test]
    fn result_always_emits_every_field() {
        let result = CeleryResult {
            status: "SUCCESS".to_string(),
            traceback: None,
            result: json!(5),
            task_id: "X".to_string(),
            children: Vec::new(),
        };
        assert_eq!(
            serde_json::to_string(&result).unwrap(),
            r#"{"status":"SUCCESS","traceback":null,"result":5,"task_id":"X","children":[]}"#
        );
    }
}
