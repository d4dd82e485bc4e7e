//! ArgsCodec - Request の引数を Task 型へ bind する

use serde_json::Value;

use super::task::{ArgShape, Task};
use crate::domain::{Request, TaskError};

/// Request から `T` を組み立てる。
///
/// `Positional` は欠番を null で埋めた配列、`Keyword` はオブジェクトとして decode します。
pub fn bind_args<T: Task>(request: &Request) -> Result<T, TaskError> {
    let value = match T::SHAPE {
        ArgShape::Positional => Value::Array(request.args.to_vec()),
        ArgShape::Keyword => Value::Object(request.kwargs.as_map().clone()),
    };

    serde_json::from_value(value).map_err(|source| TaskError::InvalidArguments {
        task: request.name.clone(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ArgMap;
    use crate::typed::task::fixtures::{Add, Explode, Greet};
    use serde_json::json;

    #[test]
    fn positional_args_bind_to_tuple_struct() {
        let request =
            Request::new("tasks.add", "1").with_args(ArgMap::from(vec![json!(2), json!(3)]));

        let Add(a, b) = bind_args::<Add>(&request).unwrap();
        assert_eq!((a, b), (2, 3));
    }

    #[test]
    fn keyword_args_bind_to_named_fields() {
        let request = Request::new("tasks.greet", "1")
            .with_kwargs([("name", json!("nori"))].into_iter().collect());

        let greet = bind_args::<Greet>(&request).unwrap();
        assert_eq!(greet.name, "nori");
        assert!(!greet.shout);
    }

    #[test]
    fn empty_args_bind_to_empty_struct() {
        let request = Request::new("tasks.explode", "1");
        assert!(bind_args::<Explode>(&request).is_ok());
    }

    #[test]
    fn wrong_arity_is_invalid_arguments() {
        let request = Request::new("tasks.add", "1").with_args(ArgMap::from(vec![json!(2)]));

        let err = bind_args::<Add>(&request).unwrap_err();
        assert!(matches!(err, TaskError::InvalidArguments { task, .. } if task == "tasks.add"));
    }

    #[test]
    fn gap_in_positional_args_is_null() {
        let mut args = ArgMap::new();
        args.insert(1, 3);
        let request = Request::new("tasks.add", "1").with_args(args);

        // index 0 は null になり i64 に decode できない
        assert!(bind_args::<Add>(&request).is_err());
    }
}
