/*!
    Output device collaborators.
*/

use playback_types::PixelFormat;

/**
    Render target for presented video frames.

    All calls come from the scheduler thread, in the order
    texture setup, pixel upload, timestamp, render request.
*/
pub trait VideoDevice: Send {
    /**
        (Re)create the texture for frames of the given geometry.
    */
    fn init_texture(&mut self, width: u32, height: u32, format: PixelFormat);

    /**
        Upload a planar YUV 4:2:0 picture.
    */
    fn update_yuv(&mut self, planes: [&[u8]; 3], pitches: [usize; 3]);

    /**
        Upload a packed 32-bit picture.
    */
    fn update_argb(&mut self, data: &[u8], pitch: usize);

    fn set_timestamp(&mut self, pts: f64);

    fn request_render(&mut self);

    /**
        Called once when the scheduler shuts down.
    */
    fn terminate(&mut self);
}

/**
    Format the audio output device runs at, as negotiated by the device.

    The device always consumes interleaved signed 16-bit samples.
*/
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioDeviceSpec {
    pub sample_rate: u32,
    pub channels: u16,
    /// Bytes the device asks for per callback.
    pub buffer_size: usize,
}
