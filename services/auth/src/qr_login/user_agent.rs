//! 桌面端 User-Agent 粗粒度识别，仅用于扫码后展示，不参与任何安全判断。

use rdv_shared_protocol::DesktopInfo;

const UNKNOWN: &str = "Unknown";

/// 一条识别规则：包含任一 `any` 且不包含任何 `none` 时命中。
struct Rule {
    any: &'static [&'static str],
    none: &'static [&'static str],
    label: &'static str,
}

const fn rule(
    any: &'static [&'static str],
    none: &'static [&'static str],
    label: &'static str,
) -> Rule {
    Rule { any, none, label }
}

// 顺序敏感：更具体的特征在前。
const BROWSER_RULES: &[Rule] = &[
    rule(&["Edg/"], &[], "Edge"),
    rule(&["OPR/", "Opera"], &[], "Opera"),
    rule(&["Chrome/"], &[], "Chrome"),
    rule(&["Firefox/"], &[], "Firefox"),
    rule(&["Safari/"], &["Chrome"], "Safari"),
    rule(&["MSIE", "Trident/"], &[], "Internet Explorer"),
];

const OS_RULES: &[Rule] = &[
    rule(&["Windows NT 10.0"], &[], "Windows 10/11"),
    rule(&["Windows NT 6.3"], &[], "Windows 8.1"),
    rule(&["Windows NT 6.2"], &[], "Windows 8"),
    rule(&["Windows NT 6.1"], &[], "Windows 7"),
    rule(&["Windows NT 6.0"], &[], "Windows Vista"),
    rule(&["Windows NT 5.1"], &[], "Windows XP"),
    rule(&["Windows NT 5.0"], &[], "Windows 2000"),
    rule(&["Windows"], &[], "Windows"),
    rule(&["iPhone"], &[], "iOS"),
    rule(&["iPad"], &[], "iPadOS"),
    rule(&["Mac"], &[], "macOS"),
    rule(&["HarmonyOS"], &[], "HarmonyOS"),
    rule(&["Android"], &[], "Android"),
    rule(&["CrOS"], &[], "Chrome OS"),
    rule(&["FreeBSD"], &[], "FreeBSD"),
    rule(&["X11"], &[], "UNIX"),
    rule(&["Linux"], &[], "Linux"),
];

fn first_match(rules: &[Rule], user_agent: &str) -> &'static str {
    rules
        .iter()
        .find(|rule| {
            rule.any.iter().any(|needle| user_agent.contains(needle))
                && !rule.none.iter().any(|needle| user_agent.contains(needle))
        })
        .map_or(UNKNOWN, |rule| rule.label)
}

/// 返回 (浏览器, 操作系统) 标签；无法识别时为 `Unknown`。
pub(crate) fn parse_user_agent(user_agent: &str) -> (&'static str, &'static str) {
    let user_agent = user_agent.trim();
    if user_agent.is_empty() {
        return (UNKNOWN, UNKNOWN);
    }
    (
        first_match(BROWSER_RULES, user_agent),
        first_match(OS_RULES, user_agent),
    )
}

/// 组装移动端展示的桌面端信息。
pub(crate) fn describe_desktop(ip: &str, user_agent: &str) -> DesktopInfo {
    let (browser, os) = parse_user_agent(user_agent);
    DesktopInfo {
        ip: ip.to_string(),
        browser: browser.to_string(),
        os: os.to_string(),
    }
}
