// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fmt, sync::Arc};

use once_cell::sync::OnceCell;

use crate::{
    core::{
        errors::{Error, Result},
        id::{CapturedId, RequestId, ValueId},
        unique_hash::{UniqueHasher, UpdateUniqueHash},
        value::Value,
    },
    requests::{
        CachingLevel,
        function::{CalcFunction, FunctionKind},
        retry::Retrier,
        uuid::RequestUuid,
    },
};

/// Resolution properties shared by similar requests: the uuid naming the
/// function binding, the caching level, and the optional introspection
/// title and retry policy.
#[derive(Clone)]
pub struct RequestProps {
    pub(crate) uuid: RequestUuid,
    pub(crate) level: CachingLevel,
    pub(crate) title: Option<String>,
    pub(crate) retrier: Option<Arc<dyn Retrier>>,
    pub(crate) kind: FunctionKind,
}

impl RequestProps {
    pub fn new(level: CachingLevel, uuid: RequestUuid) -> Self {
        Self {
            uuid,
            level,
            title: None,
            retrier: None,
            kind: FunctionKind::Plain,
        }
    }

    /// Enables introspection under the given title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_retrier(mut self, retrier: Arc<dyn Retrier>) -> Self {
        self.retrier = Some(retrier);
        self
    }

    pub fn with_kind(mut self, kind: FunctionKind) -> Self {
        self.kind = kind;
        self
    }
}

/// Request for an immediate value. No caching, no introspection, empty uuid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValueRequest {
    pub(crate) value: Value,
}

impl ValueRequest {
    pub fn value(&self) -> &Value {
        &self.value
    }
}

/// A pure function of subrequests. Resolution resolves the arguments in
/// order, then invokes the function on the resolved values.
pub struct FunctionRequest {
    pub(crate) uuid: RequestUuid,
    pub(crate) level: CachingLevel,
    pub(crate) title: Option<String>,
    pub(crate) function: Arc<dyn CalcFunction>,
    pub(crate) kind: FunctionKind,
    pub(crate) retrier: Option<Arc<dyn Retrier>>,
    pub(crate) args: Vec<Request>,
    captured: OnceCell<CapturedId>,
}

impl fmt::Debug for FunctionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRequest")
            .field("uuid", &self.uuid.as_str())
            .field("level", &self.level)
            .field("title", &self.title)
            .field("args", &self.args.len())
            .finish()
    }
}

/// A request whose computation happens on a remote peer. It carries no
/// function; the peer resolves the real request registered under the same
/// uuid. Arguments are carried so the serialized tree is complete and the
/// captured identity discriminates between argument sets.
pub struct ProxyRequest {
    pub(crate) uuid: RequestUuid,
    pub(crate) level: CachingLevel,
    pub(crate) title: Option<String>,
    pub(crate) retrier: Option<Arc<dyn Retrier>>,
    pub(crate) args: Vec<Request>,
    captured: OnceCell<CapturedId>,
}

impl fmt::Debug for ProxyRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyRequest")
            .field("uuid", &self.uuid.as_str())
            .field("level", &self.level)
            .field("title", &self.title)
            .field("args", &self.args.len())
            .finish()
    }
}

/// `{uuid, title}` pair for log lines and remote dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestEssentials {
    pub uuid: String,
    pub title: Option<String>,
}

/// Depth-first visitor over a request tree.
pub trait ReqVisitor {
    fn enter(&mut self, req: &Request) -> Result<()>;

    fn leave(&mut self, _req: &Request) -> Result<()> {
        Ok(())
    }
}

/// A node in a computation tree.
#[derive(Clone, Debug)]
pub enum Request {
    Value(ValueRequest),
    Function(Arc<FunctionRequest>),
    Proxy(Arc<ProxyRequest>),
}

/// Builds a literal value request.
pub fn rq_value(value: impl Into<Value>) -> Request {
    Request::Value(ValueRequest {
        value: value.into(),
    })
}

/// Builds a function request. The uuid picks up the caching level as an
/// extension and is finalized here.
pub fn rq_function(
    props: RequestProps,
    function: Arc<dyn CalcFunction>,
    args: Vec<Request>,
) -> Result<Request> {
    let uuid = finalize_uuid(props.uuid, props.level)?;
    Ok(Request::Function(Arc::new(FunctionRequest {
        uuid,
        level: props.level,
        title: props.title,
        function,
        kind: props.kind,
        retrier: props.retrier,
        args,
        captured: OnceCell::new(),
    })))
}

/// Builds a proxy request for remote resolution.
pub fn rq_proxy(props: RequestProps, args: Vec<Request>) -> Result<Request> {
    let uuid = finalize_uuid(props.uuid, props.level)?;
    if uuid.is_empty() {
        return Err(Error::Uuid("proxy request needs a non-empty uuid".into()));
    }
    Ok(Request::Proxy(Arc::new(ProxyRequest {
        uuid,
        level: props.level,
        title: props.title,
        retrier: props.retrier,
        args,
        captured: OnceCell::new(),
    })))
}

/// Rebuilds a function request from deserialized parts; the uuid is already
/// finalized.
pub(crate) fn function_from_parts(
    uuid: RequestUuid,
    level: CachingLevel,
    title: Option<String>,
    function: Arc<dyn CalcFunction>,
    kind: FunctionKind,
    retrier: Option<Arc<dyn Retrier>>,
    args: Vec<Request>,
) -> Request {
    Request::Function(Arc::new(FunctionRequest {
        uuid,
        level,
        title,
        function,
        kind,
        retrier,
        args,
        captured: OnceCell::new(),
    }))
}

fn finalize_uuid(uuid: RequestUuid, level: CachingLevel) -> Result<RequestUuid> {
    if uuid.is_empty() {
        return Ok(uuid);
    }
    Ok(uuid.set_level(level)?.finalize())
}

impl Request {
    /// The uuid naming this request's class; `None` for value leaves.
    pub fn uuid(&self) -> Option<&RequestUuid> {
        match self {
            Self::Value(_) => None,
            Self::Function(f) => Some(&f.uuid),
            Self::Proxy(p) => Some(&p.uuid),
        }
    }

    pub fn caching_level(&self) -> CachingLevel {
        match self {
            Self::Value(_) => CachingLevel::None,
            Self::Function(f) => f.level,
            Self::Proxy(p) => p.level,
        }
    }

    pub fn is_introspective(&self) -> bool {
        self.introspection_title().is_some()
    }

    pub fn introspection_title(&self) -> Option<&str> {
        match self {
            Self::Value(_) => None,
            Self::Function(f) => f.title.as_deref(),
            Self::Proxy(p) => p.title.as_deref(),
        }
    }

    pub fn essentials(&self) -> Option<RequestEssentials> {
        self.uuid().map(|uuid| RequestEssentials {
            uuid: uuid.as_str().to_owned(),
            title: self.introspection_title().map(str::to_owned),
        })
    }

    pub fn is_cacheable(&self) -> bool {
        self.caching_level() != CachingLevel::None
    }

    pub fn is_disk_cacheable(&self) -> bool {
        self.caching_level() == CachingLevel::Full
            && self.uuid().is_some_and(RequestUuid::disk_cacheable)
    }

    pub fn is_serializable(&self) -> bool {
        self.uuid().is_some_and(RequestUuid::serializable)
    }

    /// The subrequests of this node, in argument order.
    pub fn subrequests(&self) -> &[Request] {
        match self {
            Self::Value(_) => &[],
            Self::Function(f) => &f.args,
            Self::Proxy(p) => &p.args,
        }
    }

    /// Pre-order walk over the tree.
    pub fn accept(&self, visitor: &mut dyn ReqVisitor) -> Result<()> {
        visitor.enter(self)?;
        for sub in self.subrequests() {
            sub.accept(visitor)?;
        }
        visitor.leave(self)
    }

    /// The retry policy attached to this request, if any.
    pub fn retrier(&self) -> Option<&Arc<dyn Retrier>> {
        match self {
            Self::Value(_) => None,
            Self::Function(f) => f.retrier.as_ref(),
            Self::Proxy(p) => p.retrier.as_ref(),
        }
    }

    /// The opaque identity this request is cached under.
    pub fn captured_id(&self) -> CapturedId {
        match self {
            Self::Value(v) => CapturedId::new(ValueId(v.value.clone())),
            Self::Function(f) => f
                .captured
                .get_or_init(|| capture_request_id(&f.uuid, &f.args))
                .clone(),
            Self::Proxy(p) => p
                .captured
                .get_or_init(|| capture_request_id(&p.uuid, &p.args))
                .clone(),
        }
    }

    /// Resolves this request against a context.
    pub async fn resolve(&self, ctx: &crate::context::Context) -> Result<Value> {
        crate::resolve::resolve_request::resolve_request(ctx, self).await
    }

    /// Canonical JSON form; requires a non-empty uuid.
    pub fn save(&self) -> Result<String> {
        crate::requests::serialization::serialize_request(self)
    }

    /// Rebuilds a request from canonical JSON through the registry.
    pub fn load(
        registry: &crate::resolve::seri_registry::SeriRegistry,
        seri_req: &str,
    ) -> Result<Request> {
        crate::requests::serialization::deserialize_request(registry, seri_req)
    }

    /// Cheap hash for unordered-map keys.
    pub fn hash64(&self) -> u64 {
        self.captured_id().as_id().hash64()
    }

    /// Feeds this request's identity into a cryptographic hasher.
    pub fn update_hash(&self, hasher: &mut UniqueHasher) {
        self.captured_id().as_id().update_hash(hasher);
    }
}

fn capture_request_id(uuid: &RequestUuid, args: &[Request]) -> CapturedId {
    let arg_ids = args.iter().map(Request::captured_id).collect();
    CapturedId::new(RequestId::new(uuid.as_str().to_owned(), arg_ids))
}

// Structural equality: same uuid and pairwise-equal argument identities.
impl PartialEq for Request {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Value(a), Self::Value(b)) => a == b,
            _ => self.captured_id() == other.captured_id(),
        }
    }
}

impl Eq for Request {}

impl UpdateUniqueHash for Request {
    fn update_unique_hash(&self, hasher: &mut UniqueHasher) {
        self.update_hash(hasher);
    }
}
