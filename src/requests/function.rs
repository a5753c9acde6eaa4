// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::core::{errors::Result, value::Value};

/// The kind of function a request holds. Plain functions are wrapped into
/// the async interface at registration; the distinction is kept because it
/// is part of a request class's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Plain,
    Coro,
}

/// A calculation invoked on resolved argument values.
///
/// Implementations must be pure: the result may be cached under the
/// request's identity, shared between structurally equal requests, and
/// persisted to secondary storage.
#[async_trait]
pub trait CalcFunction: Send + Sync {
    async fn invoke(&self, args: Vec<Value>) -> Result<Value>;
}

struct PlainFunction<F> {
    f: F,
}

#[async_trait]
impl<F> CalcFunction for PlainFunction<F>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args)
    }
}

struct CoroFunction<F> {
    f: F,
}

#[async_trait]
impl<F> CalcFunction for CoroFunction<F>
where
    F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync,
{
    async fn invoke(&self, args: Vec<Value>) -> Result<Value> {
        (self.f)(args).await
    }
}

/// Wraps a plain (non-suspending) function.
pub fn plain_function<F>(f: F) -> Arc<dyn CalcFunction>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync + 'static,
{
    Arc::new(PlainFunction { f })
}

/// Wraps a coroutine returning a boxed future.
pub fn coro_function<F>(f: F) -> Arc<dyn CalcFunction>
where
    F: Fn(Vec<Value>) -> BoxFuture<'static, Result<Value>> + Send + Sync + 'static,
{
    Arc::new(CoroFunction { f })
}
