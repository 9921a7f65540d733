use std::collections::BTreeSet;

/// 月份分配: 1..=12 升序扫描, 跳过已缴月份, 最多取 month_count 个
///
/// 年内未缴月份不足时返回短列表 (调用方据此拒绝确认);
/// 绝不产生 1..=12 之外的月份, 也不跨年滚动
pub fn suggest_months(month_count: u32, already_paid: &BTreeSet<u32>) -> Vec<u32> {
    let mut selected = Vec::with_capacity(month_count as usize);
    for month in 1..=12u32 {
        if selected.len() as u32 >= month_count {
            break;
        }
        if !already_paid.contains(&month) {
            selected.push(month);
        }
    }
    selected
}
