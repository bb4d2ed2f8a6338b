// 进度聚合
//
// 把低层的逐条目进度事件换算成会话级的总体完成百分比。
// 百分比在单个任务内单调不减，这一不变量由聚合公式加钳制保证

use crate::session::{JobPhase, ManifestItem, Session};

/// 保留两位小数，四舍五入（远离零）
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// 条目总数未知/为零时按 1 计算，避免除零
///
/// 原始行为的防御性兜底，按原样保留
fn effective_total(total: usize) -> usize {
    if total == 0 {
        1
    } else {
        total
    }
}

/// 计算当前条目传输中的总体百分比
///
/// 单条目任务直接取条目百分比；合集按
/// (已完成数 * 100 + 当前条目百分比) / 总数 换算
pub fn overall_percent(completed: usize, total: usize, item_percent: f64) -> f64 {
    let total = effective_total(total);
    if total == 1 {
        round2(item_percent)
    } else {
        round2((completed as f64 * 100.0 + item_percent) / total as f64)
    }
}

/// 计算条目完成后的总体百分比（全部完成时精确等于 100.0）
pub fn completion_percent(completed: usize, total: usize) -> f64 {
    let total = effective_total(total);
    if completed >= total {
        100.0
    } else {
        round2(completed as f64 / total as f64 * 100.0)
    }
}

/// 应用一次"条目传输中"事件
///
/// 标题从事件携带的元数据里顺带更新，事件没带标题就是空字符串
pub fn apply_downloading(session: &mut Session, percent: f64, raw: &str, label: &str) {
    let job = &mut session.job;
    if job.phase.is_terminal() {
        return;
    }
    job.phase = JobPhase::Downloading;
    job.current_item_label = label.to_string();
    job.current_item_raw_progress = raw.trim().to_string();

    let percent = percent.clamp(0.0, 100.0);
    let overall = overall_percent(job.items_completed, job.items_total, percent);
    if overall > job.overall_percent {
        job.overall_percent = overall;
    }

    job.touch();
}

/// 应用一次"条目完成"事件
///
/// 重复出现的标题（已在 known_items 里）不再追加到清单，
/// 但仍然计入已完成数。全部完成时转入 Finished，百分比精确为 100.0
pub fn apply_item_finished(session: &mut Session, label: &str) {
    let job = &mut session.job;
    if job.phase.is_terminal() {
        return;
    }

    job.items_completed += 1;
    if job.items_total > 0 && job.items_completed > job.items_total {
        job.items_completed = job.items_total;
    }

    // 清单按发现顺序排列：优先把已有条目标记完成，
    // 清单里没有且不是重复标题时才追加
    if let Some(entry) = job
        .manifest
        .iter_mut()
        .find(|e| e.label == label && !e.completed)
    {
        entry.completed = true;
    } else if !label.is_empty() && !session.known_items.contains(label) {
        job.manifest.push(ManifestItem {
            label: label.to_string(),
            duration: None,
            completed: true,
        });
    }

    if !label.is_empty() {
        session.known_items.insert(label.to_string());
    }

    if job.items_completed >= effective_total(job.items_total) {
        job.mark_finished();
    } else {
        let overall = completion_percent(job.items_completed, job.items_total);
        if overall > job.overall_percent {
            job.overall_percent = overall;
        }
        job.current_item_label.clear();
        job.current_item_raw_progress.clear();
        job.touch();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn session_with_total(total: usize) -> Session {
        let mut session = Session::new("test".to_string());
        session.job.items_total = total;
        session
    }

    #[test]
    fn test_single_item_percent_passthrough() {
        // 单条目任务：47.5% 的条目进度就是 47.5% 的总体进度
        let mut session = session_with_total(1);
        apply_downloading(&mut session, 47.5, "47.5%", "单个视频");
        assert_eq!(session.job.overall_percent, 47.5);
        assert_eq!(session.job.phase, JobPhase::Downloading);
        assert_eq!(session.job.current_item_label, "单个视频");
        assert_eq!(session.job.current_item_raw_progress, "47.5%");
    }

    #[test]
    fn test_three_item_aggregation() {
        // 3 个条目，已完成 1 个，当前条目 50%：(1*100+50)/3 = 50.0
        let mut session = session_with_total(3);
        session.job.items_completed = 1;
        apply_downloading(&mut session, 50.0, "50.0%", "第二集");
        assert_eq!(session.job.overall_percent, 50.0);
    }

    #[test]
    fn test_rounding_two_decimals() {
        // (0*100+50)/3 = 16.666... -> 16.67
        let mut session = session_with_total(3);
        apply_downloading(&mut session, 50.0, "50.0%", "第一集");
        assert_eq!(session.job.overall_percent, 16.67);
    }

    #[test]
    fn test_zero_total_floored_to_one() {
        // 总数未知时按 1 计算，不除零
        let mut session = session_with_total(0);
        apply_downloading(&mut session, 30.0, "30.0%", "");
        assert_eq!(session.job.overall_percent, 30.0);

        apply_item_finished(&mut session, "唯一条目");
        assert_eq!(session.job.phase, JobPhase::Finished);
        assert_eq!(session.job.overall_percent, 100.0);
    }

    #[test]
    fn test_finish_sequence_ends_at_exactly_100() {
        let mut session = session_with_total(3);
        apply_item_finished(&mut session, "一");
        assert_eq!(session.job.overall_percent, 33.33);
        apply_item_finished(&mut session, "二");
        assert_eq!(session.job.overall_percent, 66.67);
        apply_item_finished(&mut session, "三");
        assert_eq!(session.job.overall_percent, 100.0);
        assert_eq!(session.job.phase, JobPhase::Finished);
        assert!(session.job.current_item_label.is_empty());
    }

    #[test]
    fn test_completed_never_exceeds_total() {
        let mut session = session_with_total(2);
        apply_item_finished(&mut session, "一");
        apply_item_finished(&mut session, "二");
        apply_item_finished(&mut session, "三");
        assert_eq!(session.job.items_completed, 2);
    }

    #[test]
    fn test_duplicate_label_not_reappended_but_counted() {
        let mut session = session_with_total(3);
        session.known_items.insert("重复歌曲".to_string());

        apply_item_finished(&mut session, "重复歌曲");

        // 计数照常增加，清单不追加重复条目
        assert_eq!(session.job.items_completed, 1);
        assert!(session.job.manifest.is_empty());
    }

    #[test]
    fn test_finished_item_marks_manifest_entry() {
        let mut session = session_with_total(2);
        session.job.manifest = vec![
            ManifestItem {
                label: "第一集".to_string(),
                duration: Some(60.0),
                completed: false,
            },
            ManifestItem {
                label: "第二集".to_string(),
                duration: None,
                completed: false,
            },
        ];

        apply_item_finished(&mut session, "第一集");
        assert!(session.job.manifest[0].completed);
        assert!(!session.job.manifest[1].completed);
        assert_eq!(session.job.manifest.len(), 2);
    }

    #[test]
    fn test_percent_never_decreases_on_stale_item_percent() {
        let mut session = session_with_total(1);
        apply_downloading(&mut session, 80.0, "80.0%", "视频");
        apply_downloading(&mut session, 40.0, "40.0%", "视频");
        // 原始字符串照常更新，但总体百分比不回退
        assert_eq!(session.job.overall_percent, 80.0);
        assert_eq!(session.job.current_item_raw_progress, "40.0%");
    }

    proptest! {
        /// 任意事件序列下：已完成数单调不减且不超过总数，
        /// 总体百分比单调不减且落在 [0,100]
        #[test]
        fn prop_progress_monotonic(
            total in 1usize..6,
            events in prop::collection::vec((any::<bool>(), 0.0f64..=100.0), 0..40),
        ) {
            let mut session = session_with_total(total);
            let mut last_percent = 0.0f64;
            let mut last_completed = 0usize;
            let mut item = 0usize;

            for (finish, percent) in events {
                if finish {
                    item += 1;
                    apply_item_finished(&mut session, &format!("条目{}", item));
                } else {
                    apply_downloading(&mut session, percent, "", "条目");
                }

                let job = &session.job;
                prop_assert!(job.overall_percent >= last_percent);
                prop_assert!((0.0..=100.0).contains(&job.overall_percent));
                prop_assert!(job.items_completed >= last_completed);
                prop_assert!(job.items_completed <= total);

                last_percent = job.overall_percent;
                last_completed = job.items_completed;
            }
        }
    }
}
