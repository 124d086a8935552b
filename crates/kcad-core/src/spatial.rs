//! 空间索引（基于网格）
//!
//! 用于相邻地块检查的候选对筛选。条目以地块在批次中的序号为键。

use crate::math::{BoundingBox2, Point2};
use std::collections::{HashMap, HashSet};

#[derive(Debug)]
pub struct SpatialIndex {
    /// 网格单元大小
    cell_size: f64,

    /// 网格映射：网格坐标 -> 条目列表
    grid: HashMap<(i64, i64), Vec<usize>>,

    /// 条目的包围盒缓存
    bboxes: HashMap<usize, BoundingBox2>,
}

impl SpatialIndex {
    pub fn new(cell_size: f64) -> Self {
        Self {
            cell_size: if cell_size.is_finite() && cell_size > 0.0 {
                cell_size
            } else {
                100.0
            },
            grid: HashMap::new(),
            bboxes: HashMap::new(),
        }
    }

    /// 以包围盒平均尺寸为网格大小建立索引
    pub fn build(bboxes: impl IntoIterator<Item = (usize, BoundingBox2)>) -> Self {
        let entries: Vec<(usize, BoundingBox2)> = bboxes
            .into_iter()
            .filter(|(_, b)| !b.is_empty())
            .collect();
        let mean = if entries.is_empty() {
            100.0
        } else {
            entries
                .iter()
                .map(|(_, b)| b.width().max(b.height()))
                .sum::<f64>()
                / entries.len() as f64
        };
        let mut index = Self::new(mean.max(1.0));
        for (id, bbox) in entries {
            index.insert(id, bbox);
        }
        index
    }

    pub fn cell_size(&self) -> f64 {
        self.cell_size
    }

    /// 将世界坐标转换为网格坐标
    fn to_grid_coord(&self, x: f64, y: f64) -> (i64, i64) {
        (
            (x / self.cell_size).floor() as i64,
            (y / self.cell_size).floor() as i64,
        )
    }

    /// 获取包围盒覆盖的所有网格单元
    fn cells_for_bbox(&self, bbox: &BoundingBox2) -> Vec<(i64, i64)> {
        let (min_gx, min_gy) = self.to_grid_coord(bbox.min.x, bbox.min.y);
        let (max_gx, max_gy) = self.to_grid_coord(bbox.max.x, bbox.max.y);

        let mut cells = Vec::new();
        for gx in min_gx..=max_gx {
            for gy in min_gy..=max_gy {
                cells.push((gx, gy));
            }
        }
        cells
    }

    pub fn insert(&mut self, id: usize, bbox: BoundingBox2) {
        self.remove(id);
        for cell in self.cells_for_bbox(&bbox) {
            self.grid.entry(cell).or_default().push(id);
        }
        self.bboxes.insert(id, bbox);
    }

    pub fn remove(&mut self, id: usize) -> bool {
        if let Some(bbox) = self.bboxes.remove(&id) {
            for cell in self.cells_for_bbox(&bbox) {
                if let Some(ids) = self.grid.get_mut(&cell) {
                    ids.retain(|e| *e != id);
                }
            }
            true
        } else {
            false
        }
    }

    /// 范围查询：查找与指定矩形相交的所有条目
    pub fn query_rect(&self, rect: &BoundingBox2) -> Vec<usize> {
        let mut result = Vec::new();
        let mut seen = HashSet::new();

        for cell in self.cells_for_bbox(rect) {
            if let Some(ids) = self.grid.get(&cell) {
                for id in ids {
                    if seen.insert(*id) {
                        if let Some(bbox) = self.bboxes.get(id) {
                            if bbox.intersects(rect) {
                                result.push(*id);
                            }
                        }
                    }
                }
            }
        }

        result.sort_unstable();
        result
    }

    /// 点查询
    pub fn query_point(&self, point: &Point2) -> Vec<usize> {
        let cell = self.to_grid_coord(point.x, point.y);
        let mut result: Vec<usize> = self
            .grid
            .get(&cell)
            .into_iter()
            .flatten()
            .copied()
            .filter(|id| self.bboxes.get(id).is_some_and(|b| b.contains(point)))
            .collect();
        result.sort_unstable();
        result
    }

    /// 包围盒在 `margin` 范围内相交的所有条目对 (a, b)，a < b，按序输出
    pub fn candidate_pairs(&self, margin: f64) -> Vec<(usize, usize)> {
        let mut ids: Vec<usize> = self.bboxes.keys().copied().collect();
        ids.sort_unstable();

        let mut pairs = Vec::new();
        for a in ids {
            let Some(bbox) = self.bboxes.get(&a) else {
                continue;
            };
            for b in self.query_rect(&bbox.inflate(margin)) {
                if b > a {
                    pairs.push((a, b));
                }
            }
        }
        pairs
    }

    pub fn len(&self) -> usize {
        self.bboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bboxes.is_empty()
    }

    pub fn get_bbox(&self, id: usize) -> Option<&BoundingBox2> {
        self.bboxes.get(&id)
    }
}
