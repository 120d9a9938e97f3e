//! ResNet バックボーン
//!
//! torchvision の ResNet-18/34/50 と同じ構造・同じパラメータ名で定義します。
//! パラメータ名を揃えているため、torchvision の ImageNet 学習済み重みを
//! キーの付け替えだけで読み込めます（[`crate::ml::pretrained`] を参照）。
//! 最終全結合層 `fc` はここには含めず、分類ヘッド側で差し替えます。

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig, MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, PaddingConfig2d, Relu,
    },
    tensor::{backend::Backend, Tensor},
};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// バックボーンの種類
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backbone {
    #[value(name = "resnet18")]
    ResNet18,
    #[value(name = "resnet34")]
    ResNet34,
    #[default]
    #[value(name = "resnet50")]
    ResNet50,
}

impl std::fmt::Display for Backbone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backbone::ResNet18 => write!(f, "resnet18"),
            Backbone::ResNet34 => write!(f, "resnet34"),
            Backbone::ResNet50 => write!(f, "resnet50"),
        }
    }
}

impl Backbone {
    /// 各ステージのブロック数
    pub fn layers(&self) -> [usize; 4] {
        match self {
            Backbone::ResNet18 => [2, 2, 2, 2],
            Backbone::ResNet34 | Backbone::ResNet50 => [3, 4, 6, 3],
        }
    }

    /// ボトルネックブロックを使うか
    pub fn bottleneck(&self) -> bool {
        matches!(self, Backbone::ResNet50)
    }

    /// ブロック出力チャネルの倍率
    pub fn expansion(&self) -> usize {
        if self.bottleneck() {
            4
        } else {
            1
        }
    }

    /// 平均プーリング後の特徴次元（fc の入力次元）
    pub fn feature_width(&self) -> usize {
        512 * self.expansion()
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> ResNet<B> {
        let [n1, n2, n3, n4] = self.layers();
        let bottleneck = self.bottleneck();
        let expansion = self.expansion();
        let mut in_channels = 64;

        // 各ステージの先頭ブロックだけが stride を持つ
        let mut make_layer = |planes: usize, num_blocks: usize, stride: usize| {
            let blocks = (0..num_blocks)
                .map(|i| {
                    let stride = if i == 0 { stride } else { 1 };
                    let block = ResidualBlock::new(in_channels, planes, stride, bottleneck, device);
                    in_channels = planes * expansion;
                    block
                })
                .collect();
            ResNetLayer { blocks }
        };

        let layer1 = make_layer(64, n1, 1);
        let layer2 = make_layer(128, n2, 2);
        let layer3 = make_layer(256, n3, 2);
        let layer4 = make_layer(512, n4, 2);

        ResNet {
            conv1: Conv2dConfig::new([3, 64], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_bias(false)
                .init(device),
            bn1: BatchNormConfig::new(64).init(device),
            relu: Relu::new(),
            maxpool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            layer1,
            layer2,
            layer3,
            layer4,
            avgpool: AdaptiveAvgPool2dConfig::new([1, 1]).init(),
        }
    }
}

/// 1x1 畳み込み + BN によるショートカット
#[derive(Module, Debug)]
pub struct Downsample<B: Backend> {
    conv: Conv2d<B>,
    bn: BatchNorm<B>,
}

impl<B: Backend> Downsample<B> {
    fn new(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Self {
        Self {
            conv: Conv2dConfig::new([in_channels, out_channels], [1, 1])
                .with_stride([stride, stride])
                .with_bias(false)
                .init(device),
            bn: BatchNormConfig::new(out_channels).init(device),
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bn.forward(self.conv.forward(x))
    }
}

/// 残差ブロック
///
/// `conv3`/`bn3` がある場合はボトルネックブロック（1x1 → 3x3 → 1x1）、
/// ない場合はベーシックブロック（3x3 → 3x3）として動作します。
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    conv2: Conv2d<B>,
    bn2: BatchNorm<B>,
    conv3: Option<Conv2d<B>>,
    bn3: Option<BatchNorm<B>>,
    downsample: Option<Downsample<B>>,
    relu: Relu,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(
        in_channels: usize,
        planes: usize,
        stride: usize,
        bottleneck: bool,
        device: &B::Device,
    ) -> Self {
        let out_channels = if bottleneck { planes * 4 } else { planes };
        let downsample = (stride != 1 || in_channels != out_channels)
            .then(|| Downsample::new(in_channels, out_channels, stride, device));

        if bottleneck {
            Self {
                conv1: Conv2dConfig::new([in_channels, planes], [1, 1])
                    .with_bias(false)
                    .init(device),
                bn1: BatchNormConfig::new(planes).init(device),
                conv2: conv3x3(planes, planes, stride, device),
                bn2: BatchNormConfig::new(planes).init(device),
                conv3: Some(
                    Conv2dConfig::new([planes, out_channels], [1, 1])
                        .with_bias(false)
                        .init(device),
                ),
                bn3: Some(BatchNormConfig::new(out_channels).init(device)),
                downsample,
                relu: Relu::new(),
            }
        } else {
            Self {
                conv1: conv3x3(in_channels, planes, stride, device),
                bn1: BatchNormConfig::new(planes).init(device),
                conv2: conv3x3(planes, planes, 1, device),
                bn2: BatchNormConfig::new(planes).init(device),
                conv3: None,
                bn3: None,
                downsample,
                relu: Relu::new(),
            }
        }
    }

    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let identity = match &self.downsample {
            Some(downsample) => downsample.forward(x.clone()),
            None => x.clone(),
        };

        let out = self.relu.forward(self.bn1.forward(self.conv1.forward(x)));
        let mut out = self.bn2.forward(self.conv2.forward(out));

        if let (Some(conv3), Some(bn3)) = (&self.conv3, &self.bn3) {
            out = bn3.forward(conv3.forward(self.relu.forward(out)));
        }

        self.relu.forward(out + identity)
    }
}

fn conv3x3<B: Backend>(in_channels: usize, out_channels: usize, stride: usize, device: &B::Device) -> Conv2d<B> {
    Conv2dConfig::new([in_channels, out_channels], [3, 3])
        .with_stride([stride, stride])
        .with_padding(PaddingConfig2d::Explicit(1, 1))
        .with_bias(false)
        .init(device)
}

/// ステージ（同じ解像度で連続する残差ブロック列）
#[derive(Module, Debug)]
pub struct ResNetLayer<B: Backend> {
    blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> ResNetLayer<B> {
    fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.blocks.iter().fold(x, |x, block| block.forward(x))
    }
}

/// 分類ヘッドを除いた ResNet 本体
#[derive(Module, Debug)]
pub struct ResNet<B: Backend> {
    conv1: Conv2d<B>,
    bn1: BatchNorm<B>,
    relu: Relu,
    maxpool: MaxPool2d,
    layer1: ResNetLayer<B>,
    layer2: ResNetLayer<B>,
    layer3: ResNetLayer<B>,
    layer4: ResNetLayer<B>,
    avgpool: AdaptiveAvgPool2d,
}

impl<B: Backend> ResNet<B> {
    /// 特徴抽出
    ///
    /// # 引数
    /// - `images`: バッチ画像 [batch_size, 3, size, size]
    ///
    /// # 戻り値
    /// - 特徴ベクトル [batch_size, feature_width]
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let x = self.conv1.forward(images);
        let x = self.relu.forward(self.bn1.forward(x));
        let x = self.maxpool.forward(x);

        let x = self.layer1.forward(x);
        let x = self.layer2.forward(x);
        let x = self.layer3.forward(x);
        let x = self.layer4.forward(x);

        self.avgpool.forward(x).flatten(1, 3)
    }
}
