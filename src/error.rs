use trackable::error::ErrorKindExt;

/// crate固有のエラー型.
#[derive(Debug, Clone, TrackableError)]
pub struct Error(trackable::error::TrackableError<ErrorKind>);
impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if let Some(e) = e.get_ref().and_then(|e| e.downcast_ref::<Error>()).cloned() {
            e
        } else if e.kind() == std::io::ErrorKind::InvalidInput {
            ErrorKind::InvalidInput.cause(e).into()
        } else if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ErrorKind::HeapCorrupted.cause(e).into()
        } else {
            ErrorKind::Other.cause(e).into()
        }
    }
}
impl From<Error> for std::io::Error {
    fn from(e: Error) -> Self {
        if *e.kind() == ErrorKind::InvalidInput {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, e)
        } else {
            std::io::Error::new(std::io::ErrorKind::Other, e)
        }
    }
}

/// 発生し得るエラーの種別.
///
/// ヒープの領域不足はエラーではなく、`malloc`系メソッドの`None`で表現される点に注意.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// デバイスが起動処理中であり、リクエストを受け付けられない.
    ///
    /// # 典型的な対応策
    ///
    /// - 時間をおいてリトライする
    /// - `DeviceRequest::wait_for_running`を指定して、起動完了を待つ
    DeviceBusy,

    /// デバイス(の管理スレッド)が停止しており、利用不可能.
    ///
    /// 正常・異常に関わらず、停止後のデバイスにリクエストが
    /// 発行された場合には、このエラーが返される.
    ///
    /// # 典型的な対応策
    ///
    /// - デバイスを再起動する
    DeviceTerminated,

    /// ヒープのスナップショットが壊れている.
    ///
    /// 区切りの番兵値が一致しない場合や、ヒープ本体の途中でストリームが終端した場合に返される.
    ///
    /// # 典型的な対応策
    ///
    /// - 別のスナップショット(レプリカ等)から復元する
    HeapCorrupted,

    /// 入力が不正.
    ///
    /// # 典型的な対応策
    ///
    /// - 利用者側のプログラムを修正して入力を正しくする
    InvalidInput,

    /// その他エラー.
    ///
    /// E.g., I/Oエラー
    Other,
}
impl trackable::error::ErrorKind for ErrorKind {}
