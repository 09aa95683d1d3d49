use crate::common::*;

/// Converts a `(batch, 3, h, w)` tensor with values in `[-1, 1]` into images.
pub fn tensor_to_images(images: &Tensor) -> Fallible<Vec<RgbImage>> {
    let (batch_size, channels, height, width) = images.size4()?;
    ensure!(
        channels == 3,
        "expect 3 color channels, but get {}",
        channels
    );

    let pixels = ((images.detach().to_device(Device::Cpu) + 1.0) * 127.5)
        .round()
        .clamp(0.0, 255.0)
        .to_kind(Kind::Uint8);

    (0..batch_size)
        .map(|index| {
            let hwc = pixels.select(0, index).permute(&[1, 2, 0]).contiguous();
            let buf = Vec::<u8>::from(&hwc);
            ImageBuffer::<Rgb<u8>, Vec<u8>>::from_vec(width as u32, height as u32, buf)
                .ok_or_else(|| format_err!("pixel buffer does not match {}x{}", width, height))
        })
        .collect()
}

/// Places images of equal size side by side.
pub fn horizontal_strip(images: &[RgbImage]) -> Fallible<RgbImage> {
    let first = images
        .first()
        .ok_or_else(|| format_err!("cannot build a strip from zero images"))?;
    let (width, height) = first.dimensions();
    ensure!(
        images.iter().all(|image| image.dimensions() == (width, height)),
        "images in a strip must share the same size"
    );

    let mut strip = RgbImage::new(width * images.len() as u32, height);
    for (index, image) in images.iter().enumerate() {
        image::imageops::replace(&mut strip, image, (index as u32 * width) as i64, 0);
    }
    Ok(strip)
}

/// Builds a `(batch_size, num_types)` multi-hot tensor with `indices` set in every row.
pub fn multi_hot(
    indices: &[usize],
    num_types: usize,
    batch_size: usize,
    device: Device,
) -> Fallible<Tensor> {
    let mut row = vec![0f32; num_types];
    for &index in indices {
        ensure!(
            index < num_types,
            "attribute index {} is out of range 0..{}",
            index,
            num_types
        );
        row[index] = 1.0;
    }

    let rows = repeat_rows(&row, batch_size);
    Ok(Tensor::of_slice(&rows)
        .view([batch_size as i64, num_types as i64])
        .to_device(device))
}

fn repeat_rows(row: &[f32], count: usize) -> Vec<f32> {
    std::iter::repeat(row)
        .take(count)
        .flatten()
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_range_mapping() {
        let images = Tensor::of_slice(&[-1f32, 0., 1., -2., 2., 1.]).view([1, 3, 1, 2]);
        let converted = tensor_to_images(&images).unwrap();
        assert_eq!(converted.len(), 1);

        let image = &converted[0];
        assert_eq!(image.dimensions(), (2, 1));
        assert_eq!(image.get_pixel(0, 0).0, [0, 255, 255]);
        assert_eq!(image.get_pixel(1, 0).0, [128, 0, 255]);
    }

    #[test]
    fn strip_layout() {
        let red = RgbImage::from_pixel(2, 3, Rgb([255, 0, 0]));
        let blue = RgbImage::from_pixel(2, 3, Rgb([0, 0, 255]));
        let strip = horizontal_strip(&[red, blue]).unwrap();

        assert_eq!(strip.dimensions(), (4, 3));
        assert_eq!(strip.get_pixel(1, 2).0, [255, 0, 0]);
        assert_eq!(strip.get_pixel(2, 0).0, [0, 0, 255]);
        assert!(horizontal_strip(&[]).is_err());
    }

    #[test]
    fn multi_hot_rows() {
        let types = multi_hot(&[0, 2], 4, 3, Device::Cpu).unwrap();
        assert_eq!(types.size(), vec![3, 4]);
        let values = Vec::<f32>::from(&types);
        assert_eq!(&values[..4], &[1., 0., 1., 0.]);
        assert_eq!(&values[8..], &[1., 0., 1., 0.]);
        assert!(multi_hot(&[4], 4, 1, Device::Cpu).is_err());
    }
}
