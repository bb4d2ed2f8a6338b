// 预览解析
//
// 轻量列出合集条目（不抓取内容），结果缓存在会话上，
// 供后续提交相同链接时走快速路径

use crate::extractor::{ExtractorError, MediaExtractor};
use crate::session::{ManifestItem, PreviewCache};
use std::sync::Arc;
use tracing::{info, warn};

pub struct PreviewResolver {
    extractor: Arc<dyn MediaExtractor>,
}

impl PreviewResolver {
    pub fn new(extractor: Arc<dyn MediaExtractor>) -> Self {
        Self { extractor }
    }

    /// 解析预览
    ///
    /// 个别条目解析失败只跳过、不致命，也不计入 total；
    /// 整体解析失败才返回错误
    pub async fn resolve(&self, source_ref: &str) -> Result<PreviewCache, ExtractorError> {
        let extractor = self.extractor.clone();
        let source = source_ref.to_string();

        // 提取器调用是阻塞的，放到阻塞线程池上执行
        let metadata = tokio::task::spawn_blocking(move || extractor.resolve_metadata(&source))
            .await
            .map_err(|e| ExtractorError::Transfer(format!("预览执行失败: {}", e)))??;

        if metadata.skipped > 0 {
            warn!(
                "预览跳过 {} 个无法解析的条目: {}",
                metadata.skipped, source_ref
            );
        }

        let manifest: Vec<ManifestItem> = metadata
            .entries
            .iter()
            .map(|entry| ManifestItem {
                label: entry.label.clone(),
                duration: entry.duration,
                completed: false,
            })
            .collect();

        info!(
            "预览完成: title={}, total={}",
            metadata.title, metadata.total
        );

        Ok(PreviewCache {
            source_ref: source_ref.to_string(),
            total: metadata.total,
            title: metadata.title,
            manifest,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{
        FetchOptions, ProgressDecision, ProgressEvent, ResolvedEntry, ResolvedMetadata,
    };
    use parking_lot::Mutex;

    /// 固定返回一份元数据的提取器替身
    struct FixedExtractor {
        metadata: Mutex<Option<Result<ResolvedMetadata, ExtractorError>>>,
    }

    impl MediaExtractor for FixedExtractor {
        fn resolve_metadata(&self, _source_ref: &str) -> Result<ResolvedMetadata, ExtractorError> {
            self.metadata.lock().take().expect("resolve 只应调用一次")
        }

        fn fetch(
            &self,
            _source_ref: &str,
            _options: &FetchOptions,
            _on_progress: &mut dyn FnMut(ProgressEvent) -> ProgressDecision,
        ) -> Result<(), ExtractorError> {
            unreachable!("预览不应触发抓取")
        }
    }

    #[tokio::test]
    async fn test_preview_builds_manifest_with_skips() {
        let extractor = Arc::new(FixedExtractor {
            metadata: Mutex::new(Some(Ok(ResolvedMetadata {
                title: "测试合集".to_string(),
                total: 2,
                entries: vec![
                    ResolvedEntry {
                        label: "第一集".to_string(),
                        duration: Some(100.0),
                    },
                    ResolvedEntry {
                        label: "第二集".to_string(),
                        duration: None,
                    },
                ],
                skipped: 1,
            }))),
        });

        let resolver = PreviewResolver::new(extractor);
        let cache = resolver.resolve("https://example.com/list").await.unwrap();

        assert_eq!(cache.source_ref, "https://example.com/list");
        assert_eq!(cache.title, "测试合集");
        // 跳过的条目不计入 total
        assert_eq!(cache.total, 2);
        assert_eq!(cache.manifest.len(), 2);
        assert!(!cache.manifest[0].completed);
    }

    #[tokio::test]
    async fn test_preview_surfaces_resolution_error() {
        let extractor = Arc::new(FixedExtractor {
            metadata: Mutex::new(Some(Err(ExtractorError::Unresolvable(
                "链接无效".to_string(),
            )))),
        });

        let resolver = PreviewResolver::new(extractor);
        let result = resolver.resolve("坏链接").await;
        assert!(matches!(result, Err(ExtractorError::Unresolvable(_))));
    }
}
