//! Detection results in source-frame pixel coordinates.

use serde::Serialize;

/// Axis-aligned bounding box, `x`/`y` is the top-left corner.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn area(&self) -> i64 {
        self.width as i64 * self.height as i64
    }
}

/// One detected object. Created per inference call and replaced wholesale
/// on the next publish.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// Wire form served on the detections route:
/// `{class, confidence, bbox: [x, y, w, h]}`.
#[derive(Serialize)]
pub struct DetectionWire<'a> {
    pub class: &'a str,
    pub confidence: f32,
    pub bbox: [i32; 4],
}

impl Detection {
    pub fn to_wire(&self) -> DetectionWire<'_> {
        DetectionWire {
            class: &self.class_name,
            confidence: self.confidence,
            bbox: [
                self.bbox.x,
                self.bbox.y,
                self.bbox.width,
                self.bbox.height,
            ],
        }
    }
}

/// Intersection-over-Union of two boxes. Intersection sides are clamped
/// to zero so disjoint boxes score 0.0.
pub fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0) as i64 * (y2 - y1).max(0) as i64;
    let union = a.area() + b.area() - inter;
    if union <= 0 {
        return 0.0;
    }
    inter as f32 / union as f32
}

/// Same-class non-maximum suppression.
///
/// Detections are stable-sorted by descending confidence, so
/// equal-confidence proposals keep their original relative order. Each
/// surviving detection suppresses later detections of the same class whose
/// IoU with it exceeds `iou_threshold`.
pub fn non_max_suppression(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut suppressed = vec![false; detections.len()];
    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if suppressed[j] || detections[i].class_id != detections[j].class_id {
                continue;
            }
            if iou(&detections[i].bbox, &detections[j].bbox) > iou_threshold {
                suppressed[j] = true;
            }
        }
    }

    detections
        .into_iter()
        .zip(suppressed)
        .filter_map(|(det, dead)| (!dead).then_some(det))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: usize, confidence: f32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            class_name: class_id.to_string(),
            confidence,
            bbox,
        }
    }

    fn square(x: i32, y: i32, side: i32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: side,
            height: side,
        }
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = square(10, 10, 20);
        assert!((iou(&b, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        assert_eq!(iou(&square(0, 0, 10), &square(100, 100, 10)), 0.0);
    }

    #[test]
    fn iou_half_overlap() {
        // 10x10 boxes offset by 5 in x: inter 50, union 150.
        let a = square(0, 0, 10);
        let b = square(5, 0, 10);
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_suppresses_same_class_overlap() {
        let kept = non_max_suppression(
            vec![
                det(0, 0.9, square(0, 0, 100)),
                det(0, 0.8, square(5, 5, 100)),
            ],
            0.5,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].confidence, 0.9);
    }

    #[test]
    fn nms_keeps_overlapping_boxes_of_different_classes() {
        let kept = non_max_suppression(
            vec![
                det(0, 0.9, square(0, 0, 100)),
                det(1, 0.8, square(5, 5, 100)),
            ],
            0.5,
        );
        assert_eq!(kept.len(), 2);
    }

    #[test]
    fn nms_result_respects_iou_bound_per_class() {
        let boxes = [
            square(0, 0, 50),
            square(10, 0, 50),
            square(20, 0, 50),
            square(200, 200, 50),
        ];
        let input: Vec<_> = boxes
            .iter()
            .enumerate()
            .map(|(i, b)| det(0, 0.9 - i as f32 * 0.1, *b))
            .collect();
        let kept = non_max_suppression(input, 0.4);
        for i in 0..kept.len() {
            for j in (i + 1)..kept.len() {
                if kept[i].class_id == kept[j].class_id {
                    assert!(iou(&kept[i].bbox, &kept[j].bbox) <= 0.4);
                }
            }
        }
    }

    #[test]
    fn nms_sort_is_stable_for_equal_confidence() {
        // Two disjoint equal-confidence detections: both survive, original
        // order preserved.
        let a = det(0, 0.7, square(0, 0, 10));
        let b = det(0, 0.7, square(100, 100, 10));
        let kept = non_max_suppression(vec![a.clone(), b.clone()], 0.5);
        assert_eq!(kept, vec![a, b]);
    }
}
