//! Request-time resolution of deferred fields.
//!
//! A [`Hidden::Deferred`] field names a zero-argument callable as
//! `"<module-path>:<callable>"`. [`DynamicFieldResolver`] looks the callable
//! up through an injected [`EntrypointInvoker`], runs it, and coerces the
//! returned value to a boolean. Resolution must happen while a request is
//! being handled: callables are free to consult the ambient
//! [`RequestContext`] to decide, for example, whether the caller may see an
//! admin-only entry.
//!
//! Any failure (malformed expression, unknown module or callable, an error
//! or panic inside the callable) is logged and resolves to `false`, so a
//! broken visibility rule shows the entry rather than breaking the menu.
//!
//! ```text
//! "~.perm:is_admin" ──parse──▶ ("my_module.perm", "is_admin")
//!                    ──invoke─▶ Value ──truthy─▶ bool
//! ```

use anyhow::Result;
use async_trait::async_trait;
use futures::future::{join, join_all, BoxFuture};
use futures::FutureExt;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::warn;

use crate::host::LoadedModule;
use crate::models::{
    ExtensionSettings, FunctionInfo, Hidden, ModuleInfo, ModuleInfoRaw,
};

// ═══════════════════════════════════════════════════════════════════════
// Invocation capability
// ═══════════════════════════════════════════════════════════════════════

/// Host capability that locates and runs a callable by module path and name.
#[async_trait]
pub trait EntrypointInvoker: Send + Sync {
    async fn invoke(&self, module_path: &str, callable: &str) -> Result<Value>;
}

type Callable = Arc<dyn Fn() -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// In-process [`EntrypointInvoker`] backed by registered closures.
///
/// # Example
///
/// ```rust
/// use picmenu_index::resolve::{CallableTable, RequestContext};
///
/// let mut table = CallableTable::new();
/// table.register("my_module.perm", "is_admin", || {
///     let caller = RequestContext::current().and_then(|ctx| ctx.caller);
///     Ok(serde_json::json!(caller.as_deref() == Some("alice")))
/// });
/// ```
#[derive(Clone, Default)]
pub struct CallableTable {
    callables: HashMap<String, HashMap<String, Callable>>,
}

impl CallableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a synchronous callable.
    pub fn register<F>(&mut self, module_path: &str, name: &str, f: F)
    where
        F: Fn() -> Result<Value> + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.insert(
            module_path,
            name,
            Arc::new(move || {
                let f = f.clone();
                async move { f() }.boxed()
            }),
        );
    }

    /// Register an asynchronous callable.
    pub fn register_async<F, Fut>(&mut self, module_path: &str, name: &str, f: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.insert(module_path, name, Arc::new(move || f().boxed()));
    }

    fn insert(&mut self, module_path: &str, name: &str, callable: Callable) {
        self.callables
            .entry(module_path.to_string())
            .or_default()
            .insert(name.to_string(), callable);
    }
}

#[async_trait]
impl EntrypointInvoker for CallableTable {
    async fn invoke(&self, module_path: &str, callable: &str) -> Result<Value> {
        let module = self
            .callables
            .get(module_path)
            .ok_or_else(|| anyhow::anyhow!("No module named '{}'", module_path))?;
        let f = module.get(callable).ok_or_else(|| {
            anyhow::anyhow!("Module '{}' has no callable '{}'", module_path, callable)
        })?;
        f().await
    }
}

/// Truthiness of a callable's return value.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Request context
// ═══════════════════════════════════════════════════════════════════════

tokio::task_local! {
    static REQUEST_CONTEXT: RequestContext;
}

/// Ambient per-request state visible to deferred callables.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Identity of whoever triggered the read.
    pub caller: Option<String>,
    pub attributes: BTreeMap<String, String>,
}

impl RequestContext {
    pub fn for_caller(caller: impl Into<String>) -> Self {
        Self {
            caller: Some(caller.into()),
            attributes: BTreeMap::new(),
        }
    }

    /// Run `fut` with this context installed for the current task.
    pub async fn scope<F: Future>(self, fut: F) -> F::Output {
        REQUEST_CONTEXT.scope(self, fut).await
    }

    /// The context of the request being handled, if any.
    pub fn current() -> Option<RequestContext> {
        REQUEST_CONTEXT.try_with(|ctx| ctx.clone()).ok()
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Resolver
// ═══════════════════════════════════════════════════════════════════════

/// Evaluates deferred fields against the current request.
#[derive(Clone)]
pub struct DynamicFieldResolver {
    invoker: Arc<dyn EntrypointInvoker>,
}

impl DynamicFieldResolver {
    pub fn new(invoker: Arc<dyn EntrypointInvoker>) -> Self {
        Self { invoker }
    }

    /// Resolve a hidden flag. Literals are returned without invoking
    /// anything; deferred expressions fail open to `false`.
    pub async fn resolve_hidden(&self, module: &dyn LoadedModule, expr: &Hidden) -> bool {
        let deferred = match expr {
            Hidden::Literal(value) => return *value,
            Hidden::Deferred(deferred) => deferred,
        };

        let call = async {
            let (module_path, callable) = deferred.target(module.namespace_path())?;
            let value = self.invoker.invoke(&module_path, &callable).await?;
            Ok::<_, anyhow::Error>(is_truthy(&value))
        };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(hidden)) => hidden,
            Ok(Err(e)) => {
                warn!(
                    module = %module.internal_identifier(),
                    expr = %deferred,
                    error = %format!("{:#}", e),
                    "Failed to resolve hidden status"
                );
                false
            }
            Err(_) => {
                warn!(
                    module = %module.internal_identifier(),
                    expr = %deferred,
                    "Hidden status callable panicked"
                );
                false
            }
        }
    }

    /// Produce the resolved view of `raw`, evaluating the module's own flag
    /// and every function flag concurrently.
    pub async fn resolve_module(
        &self,
        raw: &ModuleInfoRaw,
        module: &Arc<dyn LoadedModule>,
    ) -> ModuleInfo {
        let module_ref = module.as_ref();
        let extension_hidden = self.resolve_hidden(module_ref, &raw.extension.hidden);
        let function_hidden = join_all(
            raw.functions
                .iter()
                .map(|func| self.resolve_hidden(module_ref, &func.hidden)),
        );
        let (hidden_resolved, function_hidden) = join(extension_hidden, function_hidden).await;

        let functions = raw
            .functions
            .iter()
            .zip(function_hidden)
            .map(|(func, hidden)| FunctionInfo::from_raw(func, hidden))
            .collect();

        let extension = ExtensionSettings {
            hidden_resolved,
            use_markdown: raw.extension.use_markdown,
            template_override: raw.extension.template_override.clone(),
        };

        let weak: Weak<dyn LoadedModule> = Arc::downgrade(module);
        ModuleInfo::new(raw, functions, extension, weak)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::DeclaredMetadata;
    use crate::models::DeferredExpr;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Module;

    impl LoadedModule for Module {
        fn internal_identifier(&self) -> &str {
            "demo"
        }
        fn namespace_path(&self) -> &str {
            "demo_pkg"
        }
        fn declared_metadata(&self) -> Option<&DeclaredMetadata> {
            None
        }
    }

    fn deferred(expr: &str) -> Hidden {
        Hidden::Deferred(DeferredExpr::new(expr))
    }

    #[test]
    fn truthiness() {
        assert!(!is_truthy(&json!(null)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(!is_truthy(&json!([])));
        assert!(is_truthy(&json!(1.5)));
        assert!(is_truthy(&json!("no")));
        assert!(is_truthy(&json!({ "a": 1 })));
    }

    #[tokio::test]
    async fn literal_never_invokes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut table = CallableTable::new();
        table.register("demo_pkg", "boom", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            panic!("must not be called")
        });
        let resolver = DynamicFieldResolver::new(Arc::new(table));

        assert!(resolver.resolve_hidden(&Module, &Hidden::Literal(true)).await);
        assert!(!resolver.resolve_hidden(&Module, &Hidden::Literal(false)).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn own_namespace_marker_is_substituted() {
        let mut table = CallableTable::new();
        table.register("demo_pkg.perm", "always", || Ok(json!(true)));
        let resolver = DynamicFieldResolver::new(Arc::new(table));
        assert!(resolver.resolve_hidden(&Module, &deferred("~.perm:always")).await);
    }

    #[tokio::test]
    async fn async_callable_is_awaited() {
        let mut table = CallableTable::new();
        table.register_async("demo_pkg", "later", || async {
            tokio::task::yield_now().await;
            Ok(json!(1))
        });
        let resolver = DynamicFieldResolver::new(Arc::new(table));
        assert!(resolver.resolve_hidden(&Module, &deferred("~:later")).await);
    }

    #[tokio::test]
    async fn failures_fail_open() {
        let mut table = CallableTable::new();
        table.register("demo_pkg", "errors", || Err(anyhow::anyhow!("import failed")));
        table.register("demo_pkg", "panics", || panic!("boom"));
        let resolver = DynamicFieldResolver::new(Arc::new(table));

        for expr in [
            "~:errors",
            "~:panics",
            "~:missing",
            "other_pkg:anything",
            "not-an-expression",
        ] {
            assert!(
                !resolver.resolve_hidden(&Module, &deferred(expr)).await,
                "{}",
                expr
            );
        }
    }

    #[tokio::test]
    async fn callable_sees_request_context() {
        let mut table = CallableTable::new();
        table.register("demo_pkg", "not_admin", || {
            let caller = RequestContext::current().and_then(|ctx| ctx.caller);
            Ok(json!(caller.as_deref() != Some("admin")))
        });
        let resolver = DynamicFieldResolver::new(Arc::new(table));
        let expr = deferred("~:not_admin");

        let as_admin = RequestContext::for_caller("admin")
            .scope(resolver.resolve_hidden(&Module, &expr))
            .await;
        let as_guest = RequestContext::for_caller("guest")
            .scope(resolver.resolve_hidden(&Module, &expr))
            .await;
        let outside = resolver.resolve_hidden(&Module, &expr).await;

        assert!(!as_admin);
        assert!(as_guest);
        assert!(outside);
        assert!(RequestContext::current().is_none());
    }
}
