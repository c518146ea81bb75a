pub(super) fn default_name() -> String {
    "Tether".to_string()
}

pub(super) fn default_log_level() -> String {
    "info".to_string()
}

pub(super) fn default_plan() -> String {
    "free".to_string()
}

pub(super) fn default_api_url() -> String {
    "http://localhost:5000/api".to_string()
}

pub(super) fn default_timeout_secs() -> u64 {
    30
}

pub(super) fn default_socket_url() -> String {
    "http://localhost:5000".to_string()
}

pub(super) fn default_socket_path() -> String {
    "/socket.io/".to_string()
}

pub(super) fn default_debounce_ms() -> u64 {
    2000
}
