use crate::shared::error::DetectionError;
use crate::shared::frame::Frame;

/// Applies a sampling stride to a decoded frame stream.
///
/// Keeps every `stride`-th decode position (0, k, 2k, ...). Frame indices
/// are left untouched, so timestamps still reflect the true position in the
/// video. Decode failures are passed through only when they land on a
/// sampled position; failures on skipped positions are logged and dropped
/// since that frame would not have been analyzed anyway.
pub struct FrameSampler<I> {
    inner: I,
    stride: usize,
}

impl<I> FrameSampler<I>
where
    I: Iterator<Item = Result<Frame, DetectionError>>,
{
    pub fn new(inner: I, stride: usize) -> Self {
        Self {
            inner,
            stride: stride.max(1),
        }
    }

    fn is_sampled(&self, index: usize) -> bool {
        index % self.stride == 0
    }
}

impl<I> Iterator for FrameSampler<I>
where
    I: Iterator<Item = Result<Frame, DetectionError>>,
{
    type Item = Result<Frame, DetectionError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            match self.inner.next()? {
                Ok(frame) if self.is_sampled(frame.index()) => return Some(Ok(frame)),
                Ok(_) => continue,
                Err(DetectionError::FrameDecode { index, reason }) if !self.is_sampled(index) => {
                    log::debug!("Ignoring decode failure at unsampled frame {index}: {reason}");
                    continue;
                }
                Err(e) => return Some(Err(e)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(index: usize) -> Result<Frame, DetectionError> {
        Ok(Frame::new(
            vec![0u8; 3],
            1,
            1,
            3,
            index,
            Duration::from_millis(index as u64 * 40),
        ))
    }

    fn decode_error(index: usize) -> Result<Frame, DetectionError> {
        Err(DetectionError::FrameDecode {
            index,
            reason: "corrupt".into(),
        })
    }

    fn indices(items: Vec<Result<Frame, DetectionError>>) -> Vec<Result<usize, usize>> {
        items
            .into_iter()
            .map(|r| match r {
                Ok(f) => Ok(f.index()),
                Err(DetectionError::FrameDecode { index, .. }) => Err(index),
                Err(e) => panic!("unexpected error {e}"),
            })
            .collect()
    }

    #[test]
    fn test_stride_one_keeps_everything() {
        let source = (0..4).map(frame);
        let out: Vec<_> = FrameSampler::new(source, 1).collect();
        assert_eq!(indices(out), vec![Ok(0), Ok(1), Ok(2), Ok(3)]);
    }

    #[test]
    fn test_stride_keeps_true_indices_and_timestamps() {
        let source = (0..10).map(frame);
        let out: Vec<_> = FrameSampler::new(source, 3)
            .map(|r| r.unwrap())
            .collect();
        let idx: Vec<usize> = out.iter().map(|f| f.index()).collect();
        assert_eq!(idx, vec![0, 3, 6, 9]);
        assert_eq!(out[2].timestamp(), Duration::from_millis(240));
    }

    #[test]
    fn test_decode_errors_only_on_sampled_positions() {
        let source = vec![frame(0), decode_error(1), decode_error(2), frame(3)].into_iter();
        let out: Vec<_> = FrameSampler::new(source, 2).collect();
        assert_eq!(indices(out), vec![Ok(0), Err(2)]);
    }

    #[test]
    fn test_non_decode_errors_pass_through() {
        let source = vec![
            frame(0),
            Err(DetectionError::ResourceExhausted("too big".into())),
        ]
        .into_iter();
        let out: Vec<_> = FrameSampler::new(source, 5).collect();
        assert_eq!(out.len(), 2);
        assert!(matches!(
            out[1],
            Err(DetectionError::ResourceExhausted(_))
        ));
    }

    #[test]
    fn test_zero_stride_treated_as_one() {
        let source = (0..3).map(frame);
        assert_eq!(FrameSampler::new(source, 0).count(), 3);
    }
}
