//! Plugin trait definitions
//!
//! A plugin file is loaded into a [`CodeUnit`]. The unit exports bot factories
//! under a well-known name and the registry requires exactly one of them. The
//! factory builds a [`BotPlugin`], whose `setup` adds handlers to the
//! [`BotInstance`] the registry created for it.

use std::path::Path;
use std::sync::Arc;

use crate::application::errors::PluginResult;
use super::instance::BotInstance;

/// Core plugin trait that all bots must implement
pub trait BotPlugin: Send + Sync {
    /// Human-readable bot name, used in logs
    fn name(&self) -> &str;

    /// Add the bot's handlers. Runs once per load or reload, after
    /// `BotInstance::register`.
    fn setup(&self, bot: &mut BotInstance) -> PluginResult<()>;
}

/// Something a code unit exports that can build a bot
pub trait BotFactory: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self) -> PluginResult<Box<dyn BotPlugin>>;
}

/// The loaded representation of one plugin file
pub trait CodeUnit: Send + Sync {
    /// File the unit was loaded from
    fn source(&self) -> &Path;

    /// Bot factories exported by the unit, in declaration order
    fn exports(&self) -> Vec<Arc<dyn BotFactory>>;
}

/// Factory backed by a closure
pub struct FnFactory<F> {
    name: String,
    create: F,
}

impl<F> FnFactory<F>
where
    F: Fn() -> PluginResult<Box<dyn BotPlugin>> + Send + Sync,
{
    pub fn new(name: impl Into<String>, create: F) -> Self {
        Self {
            name: name.into(),
            create,
        }
    }
}

impl<F> BotFactory for FnFactory<F>
where
    F: Fn() -> PluginResult<Box<dyn BotPlugin>> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn create(&self) -> PluginResult<Box<dyn BotPlugin>> {
        (self.create)()
    }
}

/// Symbol a native plugin exports to build its bot
pub const CREATE_SYMBOL: &[u8] = b"botplug_create";

/// Symbol holding the ABI version a native plugin was built against
pub const ABI_SYMBOL: &[u8] = b"botplug_abi_version";

/// Current native plugin ABI version
pub const ABI_VERSION: u32 = 1;

/// Function signature of [`CREATE_SYMBOL`]
#[allow(improper_ctypes_definitions)]
pub type PluginCreateFn = unsafe extern "C" fn() -> *mut dyn BotPlugin;

/// Export a bot from a native plugin crate (`crate-type = ["cdylib"]`).
///
/// The plugin must be built with the same compiler and `botplug` version as
/// the host.
///
/// ```rust,ignore
/// struct FishBot;
///
/// impl BotPlugin for FishBot {
///     fn name(&self) -> &str { "FishBot" }
///
///     fn setup(&self, bot: &mut BotInstance) -> PluginResult<()> {
///         bot.add_handler(Handler::command("fish", |_| Ok(Some("🐟".to_string()))));
///         Ok(())
///     }
/// }
///
/// botplug::declare_bot!(FishBot, || FishBot);
/// ```
#[macro_export]
macro_rules! declare_bot {
    ($ty:ty, $ctor:expr) => {
        #[no_mangle]
        #[allow(non_upper_case_globals)]
        pub static botplug_abi_version: u32 = $crate::plugins::ABI_VERSION;

        #[no_mangle]
        #[allow(improper_ctypes_definitions)]
        pub extern "C" fn botplug_create() -> *mut dyn $crate::plugins::BotPlugin {
            let constructor: fn() -> $ty = $ctor;
            let bot: Box<dyn $crate::plugins::BotPlugin> = Box::new(constructor());
            Box::into_raw(bot)
        }
    };
}
