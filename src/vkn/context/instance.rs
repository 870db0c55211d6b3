use anyhow::Result;
use ash::{ext::debug_utils, vk, Entry};
use std::{
    ffi::{CStr, CString},
    os::raw::{c_char, c_void},
    sync::Arc,
};

struct InstanceInner {
    instance: ash::Instance,
    debug: Option<(debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
    // the loaded library must outlive the instance
    _entry: Entry,
}

impl Drop for InstanceInner {
    fn drop(&mut self) {
        unsafe {
            if let Some((debug_utils, messenger)) = &self.debug {
                debug_utils.destroy_debug_utils_messenger(*messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

#[derive(Clone)]
pub struct Instance(Arc<InstanceInner>);

impl std::ops::Deref for Instance {
    type Target = ash::Instance;
    fn deref(&self) -> &Self::Target {
        &self.0.instance
    }
}

impl Instance {
    /// Creates a headless instance; with validation enabled, driver messages
    /// are forwarded to the `log` facade.
    pub fn new(entry: &Entry, title: &str) -> Result<Self> {
        let validation = cfg!(not(feature = "no_validation_layer"));

        let app_name = CString::new(title)?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(app_name.as_c_str())
            .engine_name(c"No Engine")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::make_api_version(0, 1, 3, 0));

        let mut extension_names: Vec<*const c_char> = Vec::new();
        let mut layer_names: Vec<*const c_char> = Vec::new();
        if validation {
            extension_names.push(debug_utils::NAME.as_ptr());
            layer_names.push(c"VK_LAYER_KHRONOS_validation".as_ptr());
        }

        let instance_create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .flags(vk::InstanceCreateFlags::default())
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);

        let instance = unsafe { entry.create_instance(&instance_create_info, None)? };

        let debug = if validation {
            let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION,
                )
                .pfn_user_callback(Some(vulkan_debug_callback));

            let debug_utils = debug_utils::Instance::new(entry, &instance);
            let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) };
            match messenger {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        Ok(Self(Arc::new(InstanceInner {
            instance,
            debug,
            _entry: entry.clone(),
        })))
    }

    pub fn as_raw(&self) -> &ash::Instance {
        &self.0.instance
    }
}

/// Messages above this level are dropped before formatting.
const VALIDATION_LOG_LEVEL: log::Level = log::Level::Warn;

unsafe extern "system" fn vulkan_debug_callback(
    flag: vk::DebugUtilsMessageSeverityFlagsEXT,
    ty: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    use vk::DebugUtilsMessageSeverityFlagsEXT as Flag;

    let message_level = match flag {
        Flag::VERBOSE => log::Level::Debug,
        Flag::INFO => log::Level::Info,
        Flag::WARNING => log::Level::Warn,
        _ => log::Level::Error,
    };
    if message_level > VALIDATION_LOG_LEVEL {
        return vk::FALSE;
    }

    let message = CStr::from_ptr((*p_callback_data).p_message).to_string_lossy();
    let short_message = match message.split_once(" (https://") {
        Some((msg, _)) => msg,
        None => &*message,
    };
    let formatted_parts = short_message
        .split('|')
        .map(|s| s.trim())
        .collect::<Vec<&str>>()
        .join("\n");

    log::log!(message_level, "\n* [Validation] {ty:?}\n{formatted_parts}\n");
    vk::FALSE
}
