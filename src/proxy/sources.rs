//! Built-in subscription sources and source list files

use crate::proxy::crawler::Source;
use crate::Result;
use std::fs;
use std::path::Path;

const DEFAULT_SOURCE_URLS: &[&str] = &[
    "https://raw.githubusercontent.com/pojokan-id/v2ray-free/main/v2ray",
    "https://raw.githubusercontent.com/yebekhe/v2rayfree/main/v2",
    "https://raw.githubusercontent.com/freev2fly/freev2fly.github.io/gh-pages/_data/freeservers.json",
    "https://raw.githubusercontent.com/wzz1000/ClashR_for_Windows_Alpha/main/v2ray.config",
    "https://raw.githubusercontent.com/ALX-003/V2RAY-XRAYS-2024/main/V2RAY-XVLESS-XVmess/V2RAY-VMESS-VLESS-TROJAN-2024.txt",
    "https://raw.githubusercontent.com/FoxiYao/freesub/main/v2ray",
    "https://raw.githubusercontent.com/roshan9/v2ray/main/v2ray",
    "https://raw.githubusercontent.com/anam2812/v2ray-servers/main/v2ray-servers.txt",
    "https://raw.githubusercontent.com/aliaraz/v2ray-config/main/config.txt",
    "https://raw.githubusercontent.com/barry-far/V2ray-Configs/main/All_Configs_Sub.txt",
    "https://raw.githubusercontent.com/mfuu/v2ray/master/v2ray",
    "https://raw.githubusercontent.com/Pawdroid/Free-servers/main/sub",
    "https://raw.githubusercontent.com/aiboboxx/v2rayfree/main/v2",
    "https://raw.githubusercontent.com/ripaojiedian/freenode/main/sub",
    "https://raw.githubusercontent.com/peasoft/NoMoreWalls/master/list.txt",
    "https://raw.githubusercontent.com/mahdibland/V2RayAggregator/master/sub/sub_merge.txt",
    "https://raw.githubusercontent.com/Leon406/SubCrawler/main/sub/share/all3",
    "https://raw.githubusercontent.com/ts-sf/fly/main/v2",
    "https://raw.githubusercontent.com/freefq/free/master/v2",
    "https://raw.githubusercontent.com/ssrsub/ssr/master/v2ray",
    "https://raw.githubusercontent.com/Alvin9999/pac2/master/v2ray/1/config.txt",
    "https://raw.githubusercontent.com/Alvin9999/pac2/master/v2ray/2/config.txt",
    "https://raw.githubusercontent.com/Alvin9999/pac2/master/v2ray/3/config.txt",
    "https://sub.pmsub.me/base64",
    "https://raw.githubusercontent.com/tbbatbb/Proxy/master/dist/v2ray.config.txt",
    "https://raw.githubusercontent.com/changfengoss/pub/main/data/2024_01_17/cvjOPc.txt",
    "https://raw.githubusercontent.com/ermaozi/get_subscribe/main/subscribe/v2ray.txt",
    "https://raw.githubusercontent.com/w1770946466/Auto_proxy/main/Long_term_subscription1.txt",
    "https://raw.githubusercontent.com/w1770946466/Auto_proxy/main/Long_term_subscription2.txt",
    "https://raw.githubusercontent.com/w1770946466/Auto_proxy/main/Long_term_subscription3.txt",
];

/// Public subscription sources used when none are given
pub fn default_sources() -> Vec<Source> {
    DEFAULT_SOURCE_URLS
        .iter()
        .map(|url| Source::classify(url))
        .collect()
}

/// Parse one source list entry.
///
/// `feed:` and `page:` prefixes force the kind; bare URLs are classified.
pub fn parse_source_line(line: &str) -> Option<Source> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    if let Some(url) = line.strip_prefix("feed:") {
        Some(Source::feed(url.trim()))
    } else if let Some(url) = line.strip_prefix("page:") {
        Some(Source::page(url.trim()))
    } else {
        Some(Source::classify(line))
    }
}

/// Read a source list file, one URL per line
pub fn load_sources<P: AsRef<Path>>(path: P) -> Result<Vec<Source>> {
    let content = fs::read_to_string(path)?;
    Ok(content.lines().filter_map(parse_source_line).collect())
}
