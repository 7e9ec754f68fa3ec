pub const FEISHU_BASE_URL: &str = "https://open.feishu.cn";
pub const LARK_BASE_URL: &str = "https://open.larksuite.com";

/// Open-platform base URL for a configured domain: `feishu`, `lark`, or an
/// explicit URL (trailing slashes dropped).
pub fn resolve_base_url(domain: &str) -> String {
    match domain.trim() {
        "" | "feishu" => FEISHU_BASE_URL.to_string(),
        "lark" => LARK_BASE_URL.to_string(),
        custom => custom.trim_end_matches('/').to_string(),
    }
}
