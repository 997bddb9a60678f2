use std::io;

quick_error! {
    #[derive(Debug)]
    pub enum Error {
        Io(err: io::Error) {
            from()
            display("I/O error: {}", err)
        }
        Gif(err: gif::DecodingError) {
            from()
            display("invalid GIF data: {}", err)
        }
        Dispose(msg: String) {
            display("GIF frame composition failed: {}", msg)
        }
        Resize(err: resize::Error) {
            from()
            display("frame resize failed: {}", err)
        }
        TruncatedData(index: usize) {
            display("GIF data ends before frame {}", index)
        }
    }
}

pub type CatResult<T, E = Error> = Result<T, E>;
