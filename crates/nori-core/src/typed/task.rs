//! Task trait - 型付き Task の定義
//!
//! タスク名・引数の形・戻り値の型を 1 つの型に結びつけます。
//! 登録時にこの情報から `TaskBinding` を作り、dispatch 中に型を調べ直すことはありません。

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Task は「名前 + 引数の形 + 戻り値」を型で表す
///
/// # 使用例
/// ```ignore
/// #[derive(Deserialize)]
/// struct Add(i64, i64);
///
/// impl Task for Add {
///     const NAME: &'static str = "add";
///     type Output = i64;
/// }
/// ```
///
/// 位置引数の Task は tuple struct（引数なしなら `struct Ping {}`）、
/// キーワード引数の Task は名前付きフィールドの struct にすると自然に decode できます。
pub trait Task: DeserializeOwned + Send + Sync + 'static {
    /// worker 名で修飾される前のローカル名（`add` → `tasks.add`）
    const NAME: &'static str;

    /// 引数をどちらのコンテナから読むか
    const SHAPE: ArgShape = ArgShape::Positional;

    /// reply の `result` に入る値
    type Output: Serialize + Send + 'static;
}

/// Task が引数を受け取る形
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgShape {
    /// `args` を JSON 配列として decode する
    Positional,
    /// `kwargs` を JSON オブジェクトとして decode する
    Keyword,
}
