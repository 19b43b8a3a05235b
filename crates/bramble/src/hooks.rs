//! Named extension points invoked at fixed stages of a build.
//!
//! A [`HookRegistry`] is owned by the builder. Callbacks for one
//! `(owner, event)` pair run one after another in ascending priority, ties
//! in registration order. A failing or panicking callback is logged and the
//! remaining callbacks still run.

use crate::document::{Document, DocumentKind};
use crate::site::Site;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

pub const DEFAULT_PRIORITY: i32 = 50;

pub type HookResult = std::result::Result<(), Box<dyn Error + Send + Sync>>;

type HookCallback = Box<dyn Fn(&mut HookContext<'_>) -> HookResult + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookOwner {
    Site,
    Pages,
    Posts,
    Documents,
}

impl HookOwner {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "site" => Some(Self::Site),
            "pages" => Some(Self::Pages),
            "posts" => Some(Self::Posts),
            "documents" => Some(Self::Documents),
            _ => None,
        }
    }
}

impl fmt::Display for HookOwner {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Site => "site",
            Self::Pages => "pages",
            Self::Posts => "posts",
            Self::Documents => "documents",
        };
        formatter.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HookEvent {
    AfterInit,
    AfterReset,
    PostRead,
    PostInit,
    PreRender,
    PostRender,
    PostWrite,
}

impl HookEvent {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "after_init" => Some(Self::AfterInit),
            "after_reset" => Some(Self::AfterReset),
            "post_read" => Some(Self::PostRead),
            "post_init" => Some(Self::PostInit),
            "pre_render" => Some(Self::PreRender),
            "post_render" => Some(Self::PostRender),
            "post_write" => Some(Self::PostWrite),
            _ => None,
        }
    }
}

impl fmt::Display for HookEvent {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AfterInit => "after_init",
            Self::AfterReset => "after_reset",
            Self::PostRead => "post_read",
            Self::PostInit => "post_init",
            Self::PreRender => "pre_render",
            Self::PostRender => "post_render",
            Self::PostWrite => "post_write",
        };
        formatter.write_str(name)
    }
}

/// The closed set of pairs a callback may be registered for.
pub fn is_valid_pair(owner: HookOwner, event: HookEvent) -> bool {
    use HookEvent::*;
    match owner {
        HookOwner::Site => matches!(
            event,
            AfterInit | AfterReset | PostRead | PreRender | PostRender | PostWrite
        ),
        HookOwner::Pages | HookOwner::Posts | HookOwner::Documents => {
            matches!(event, PostInit | PreRender | PostRender | PostWrite)
        }
    }
}

/// What a callback may inspect and edit. Edits are visible to every later
/// callback in the same trigger.
pub enum HookContext<'a> {
    Site(&'a mut Site),
    Document(&'a mut Document),
}

struct Registration {
    name: String,
    priority: i32,
    callback: HookCallback,
}

#[derive(Default)]
pub struct HookRegistry {
    hooks: BTreeMap<(HookOwner, HookEvent), Vec<Registration>>,
}

impl fmt::Debug for HookRegistry {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = formatter.debug_map();
        for ((owner, event), registrations) in &self.hooks {
            let names: Vec<_> = registrations
                .iter()
                .map(|registration| (&registration.name, registration.priority))
                .collect();
            map.entry(&format!("{owner}:{event}"), &names);
        }
        map.finish()
    }
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `callback` for `(owner, event)`. Returns `false` and logs a
    /// warning when the pair is not a valid extension point.
    pub fn register<F>(
        &mut self,
        owner: HookOwner,
        event: HookEvent,
        name: impl Into<String>,
        priority: i32,
        callback: F,
    ) -> bool
    where
        F: Fn(&mut HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        let name = name.into();
        if !is_valid_pair(owner, event) {
            tracing::warn!("hook '{name}' refused: {owner} has no '{event}' event");
            return false;
        }

        let registrations = self.hooks.entry((owner, event)).or_default();
        // Insert after every registration with priority <= ours, so equal
        // priorities keep registration order.
        let index = registrations.partition_point(|existing| existing.priority <= priority);
        registrations.insert(
            index,
            Registration {
                name,
                priority,
                callback: Box::new(callback),
            },
        );
        true
    }

    /// String-keyed form of [`HookRegistry::register`] for plugin manifests.
    pub fn register_named<F>(
        &mut self,
        owner: &str,
        event: &str,
        name: impl Into<String>,
        priority: i32,
        callback: F,
    ) -> bool
    where
        F: Fn(&mut HookContext<'_>) -> HookResult + Send + Sync + 'static,
    {
        match (HookOwner::parse(owner), HookEvent::parse(event)) {
            (Some(owner), Some(event)) => self.register(owner, event, name, priority, callback),
            _ => {
                let name = name.into();
                tracing::warn!("hook '{name}' refused: unknown hook {owner}:{event}");
                false
            }
        }
    }

    pub fn has_registrations(&self, owner: HookOwner, event: HookEvent) -> bool {
        self.hooks
            .get(&(owner, event))
            .is_some_and(|registrations| !registrations.is_empty())
    }

    /// Runs every callback for `(owner, event)` in order and returns how
    /// many failed.
    pub fn trigger(
        &self,
        owner: HookOwner,
        event: HookEvent,
        context: &mut HookContext<'_>,
    ) -> usize {
        let Some(registrations) = self.hooks.get(&(owner, event)) else {
            return 0;
        };

        let mut failures = 0;
        for registration in registrations {
            let outcome = catch_unwind(AssertUnwindSafe(|| (registration.callback)(context)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    failures += 1;
                    tracing::warn!(
                        "hook '{}' ({owner}:{event}) failed: {error}",
                        registration.name
                    );
                }
                Err(_) => {
                    failures += 1;
                    tracing::warn!("hook '{}' ({owner}:{event}) panicked", registration.name);
                }
            }
        }
        failures
    }

    pub fn trigger_site(&self, event: HookEvent, site: &mut Site) -> usize {
        self.trigger(HookOwner::Site, event, &mut HookContext::Site(site))
    }

    /// Pages fire `pages` hooks; posts fire `posts` then `documents` hooks;
    /// collection documents fire `documents` hooks.
    pub fn trigger_document(&self, event: HookEvent, document: &mut Document) -> usize {
        let owners: &[HookOwner] = match document.kind() {
            DocumentKind::Page => &[HookOwner::Pages],
            DocumentKind::Post => &[HookOwner::Posts, HookOwner::Documents],
            DocumentKind::Collection(_) => &[HookOwner::Documents],
        };

        let mut context = HookContext::Document(document);
        owners
            .iter()
            .map(|owner| self.trigger(*owner, event, &mut context))
            .sum()
    }

    pub fn clear(&mut self) {
        self.hooks.clear();
    }
}
